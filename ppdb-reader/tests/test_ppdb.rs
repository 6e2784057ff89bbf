use std::io::Write;

use ppdb_reader::{
    DebugId, FormatErrorKind, HashAlgorithm, Language, PortablePdbFile, Scope, TableType, Uuid,
};
use ppdb_testutils::{
    encode_sequence_points, tables, write_compressed_u32, DocumentRow, LocalScopeRow, Point,
    PortablePdbBuilder, CSHARP_LANGUAGE, FSHARP_LANGUAGE, SHA256_ALGORITHM,
};
use similar_asserts::assert_eq;

/// A file with two documents, several methods and nested scopes.
fn sample_pdb() -> Vec<u8> {
    let mut builder = PortablePdbBuilder::new();
    let program = builder.add_document("/src/Program.cs", CSHARP_LANGUAGE);
    let helpers = builder.add_document("/src/Helpers.fs", FSHARP_LANGUAGE);

    let main = builder.add_method(
        program,
        &[
            Point::visible(0, 10, 5, 10, 20),
            Point::visible(7, 11, 9, 13, 10),
            Point::hidden(12),
            Point::visible(16, 14, 5, 14, 6),
        ],
    );
    let helper = builder.add_method(helpers, &[Point::visible(0, 3, 1, 3, 30)]);
    let run = builder.add_method(program, &[Point::visible(0, 20, 5, 20, 15)]);

    builder.add_scope(main, 0, 17);
    builder.add_local_variable("args", 0, 0);
    builder.add_local_variable("CS$<>8__locals0", 1, 1);
    builder.add_scope(main, 7, 5);
    builder.add_local_variable("i", 2, 0);
    builder.add_local_constant("Max");
    builder.add_scope(helper, 0, 10);
    builder.add_scope(run, 0, 8);
    builder.add_local_variable("result", 0, 0);

    builder.build()
}

fn all_scopes(pdb: &PortablePdbFile) -> Vec<Scope> {
    let mut scopes: Vec<Scope> = pdb
        .document_indices()
        .iter()
        .flat_map(|document| &document.methods)
        .flat_map(|method| method.local_scopes.iter().cloned())
        .collect();
    scopes.sort_by_key(|scope| scope.index);
    scopes
}

#[test]
fn test_minimal_document() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.add_method(
        document,
        &[Point::visible(0, 10, 1, 10, 5), Point::visible(5, 12, 1, 12, 8)],
    );
    let buf = builder.build();

    assert!(PortablePdbFile::peek(&buf));
    let pdb = PortablePdbFile::from_slice(&buf).unwrap();
    assert!(pdb.has_debug_info());

    let index = &pdb.document_indices()[0];
    assert_eq!(index.index, 1);
    assert_eq!(index.file_path, "foo.cs");
    assert_eq!(index.language, Language::CSharp);
    assert_eq!(index.language.name(), "C#");
    assert_eq!(index.hash_algorithm, HashAlgorithm::Unknown);
    assert!(index.hash.is_empty());

    let method = &index.methods[0];
    assert_eq!(method.method_def, 1);
    assert_eq!(method.first_line, Some(10));
    assert_eq!(method.last_line, Some(12));
    let offsets: Vec<u32> = method.sequence_points.iter().map(|sp| sp.il_offset).collect();
    assert_eq!(offsets, vec![0, 5]);
    assert!(method.local_scopes.is_empty());
}

#[test]
fn test_parse_is_idempotent() {
    let buf = sample_pdb();
    let first = PortablePdbFile::from_slice(&buf).unwrap();
    let second = PortablePdbFile::from_vec(buf.clone()).unwrap();

    assert_eq!(first.document_indices(), second.document_indices());
}

#[test]
fn test_methods_grouped_by_document() {
    let mut builder = PortablePdbBuilder::new();
    let a = builder.add_document("a.cs", CSHARP_LANGUAGE);
    let b = builder.add_document("b.cs", CSHARP_LANGUAGE);
    builder.add_method(a, &[Point::visible(0, 1, 1, 1, 2)]);
    builder.add_method(b, &[Point::visible(0, 2, 1, 2, 2)]);
    builder.add_method(a, &[Point::visible(0, 3, 1, 3, 2)]);
    builder.add_method_row(0, 0);
    builder.add_method(b, &[]);
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    let methods_of = |document: usize| -> Vec<u32> {
        pdb.get_document_index(document)
            .unwrap()
            .methods
            .iter()
            .map(|method| method.method_def)
            .collect()
    };
    assert_eq!(methods_of(1), vec![1, 3]);
    assert_eq!(methods_of(2), vec![2, 5]);
    assert!(pdb.get_document_index(0).is_none());
    assert!(pdb.get_document_index(3).is_none());

    // every method appears under the document its row points at
    for (row_idx, row) in pdb.method_debug_information_table().iter() {
        let listed = pdb
            .document_indices()
            .iter()
            .filter(|document| {
                document
                    .methods
                    .iter()
                    .any(|method| method.method_def as usize == row_idx)
            })
            .map(|document| document.index as u32)
            .collect::<Vec<_>>();
        match row.document {
            0 => assert!(listed.is_empty()),
            document => assert_eq!(listed, vec![document]),
        }
    }

    assert!(pdb.find_method(4).is_none());
    let (document, method) = pdb.find_method(3).unwrap();
    assert_eq!(document.file_path, "a.cs");
    assert_eq!(method.first_line, Some(3));
    assert!(pdb.find_method_by_token(0x0600_0003).is_some());
    assert!(pdb.find_method_by_token(0x0200_0003).is_none());
}

#[test]
fn test_scope_ranges_end_at_next_scope() {
    let pdb = PortablePdbFile::from_vec(sample_pdb()).unwrap();
    let scopes = all_scopes(&pdb);
    assert_eq!(scopes.len(), 4);

    let variable_table_end = pdb.local_variable_table().len() + 1;
    let constant_table_end = pdb.local_constant_table().len() + 1;
    for pair in scopes.windows(2) {
        let next = pdb.local_scope_table().row(pair[1].index).unwrap();
        assert_eq!(
            pair[0].local_variable_rows.end,
            std::cmp::min(variable_table_end, next.variable_list as usize)
        );
        assert_eq!(
            pair[0].local_constant_rows.end,
            std::cmp::min(constant_table_end, next.constant_list as usize)
        );
    }

    let last = &scopes[3];
    assert_eq!(last.local_variable_rows, 4..5);
    assert_eq!(last.local_variables[0].name, "result");

    let (_, main) = pdb.find_method(1).unwrap();
    let outer = &main.local_scopes[0];
    let names: Vec<&str> = outer.local_variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["args", "CS$<>8__locals0"]);
    assert!(!outer.local_variables[0].debugger_hidden);
    assert!(outer.local_variables[1].debugger_hidden);
    assert_eq!(outer.local_variables[1].slot, 1);
    assert!(outer.local_constants.is_empty());

    let inner = &main.local_scopes[1];
    assert_eq!(inner.local_variables[0].name, "i");
    assert_eq!(inner.local_constants[0].name, "Max");
    assert!(outer.contains(inner.start_offset));
    assert!(!inner.contains(12));

    let (_, helper) = pdb.find_method(2).unwrap();
    assert!(helper.local_scopes[0].local_variables.is_empty());
}

#[test]
fn test_empty_scope_range() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let method = builder.add_method(document, &[Point::visible(0, 1, 1, 1, 2)]);
    for name in ["a", "b", "c", "d"] {
        builder.add_local_variable(name, 0, 0);
    }
    for variable_list in [1, 3, 3] {
        builder.add_scope_row(LocalScopeRow {
            method_def: method,
            variable_list,
            constant_list: 1,
            length: 2,
            ..Default::default()
        });
    }
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    let (_, method) = pdb.find_method(method).unwrap();
    let scopes = &method.local_scopes;
    assert_eq!(scopes[0].local_variable_rows, 1..3);
    assert_eq!(scopes[1].local_variable_rows, 3..3);
    assert!(scopes[1].local_variables.is_empty());
    assert_eq!(scopes[2].local_variable_rows, 3..5);
    assert_eq!(scopes[2].local_variables.len(), 2);
}

#[test]
fn test_inconsistent_scope_range() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let method = builder.add_method(document, &[]);
    for name in ["a", "b", "c"] {
        builder.add_local_variable(name, 0, 0);
    }
    for variable_list in [3, 2] {
        builder.add_scope_row(LocalScopeRow {
            method_def: method,
            variable_list,
            constant_list: 1,
            ..Default::default()
        });
    }

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(
        err.kind(),
        FormatErrorKind::InconsistentRange {
            table: TableType::LocalVariable,
            start: 3,
            end: 2,
        }
    );
}

#[test]
fn test_scope_without_method() {
    let mut builder = PortablePdbBuilder::new();
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.add_scope_row(LocalScopeRow {
        variable_list: 1,
        constant_list: 1,
        ..Default::default()
    });

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(
        err.kind(),
        FormatErrorKind::InvalidRowIndex(TableType::MethodDef, 0)
    );
}

#[test]
fn test_line_bounds_ignore_hidden_points() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let mixed = builder.add_method(
        document,
        &[
            Point::visible(0, 20, 5, 22, 1),
            Point::hidden(4),
            Point::visible(8, 15, 1, 15, 9),
        ],
    );
    let hidden_only = builder.add_method(document, &[Point::hidden(0), Point::hidden(3)]);
    let empty = builder.add_method(document, &[]);
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    let (_, method) = pdb.find_method(mixed).unwrap();
    assert_eq!(method.first_line, Some(15));
    assert_eq!(method.last_line, Some(22));
    assert_eq!(method.sequence_points.len(), 3);
    assert_eq!(method.visible_sequence_points().count(), 2);
    assert!(method.sequence_points[1].is_hidden);
    assert_eq!(method.sequence_points[1].il_offset, 4);
    let last = method.sequence_points[2];
    assert_eq!((last.start_line, last.start_column), (15, 1));
    assert_eq!((last.end_line, last.end_column), (15, 9));

    let (_, method) = pdb.find_method(hidden_only).unwrap();
    assert_eq!(method.first_line, None);
    assert_eq!(method.last_line, None);
    assert_eq!(method.sequence_points.len(), 2);

    let (_, method) = pdb.find_method(empty).unwrap();
    assert_eq!(method.first_line, None);
    assert!(method.sequence_points.is_empty());
}

#[test]
fn test_truncation_inside_streams() {
    let buf = sample_pdb();
    let pdb = PortablePdbFile::from_slice(&buf).unwrap();

    for stream in pdb.streams() {
        let range = stream.range();
        for len in range.start + 1..range.end {
            let err = PortablePdbFile::from_slice(&buf[..len]).unwrap_err();
            assert!(
                matches!(err.kind(), FormatErrorKind::OutOfBounds { .. }),
                "truncating {} at {len}: {err}",
                stream.name
            );
        }
    }
}

#[test]
fn test_guid_index_zero() {
    let buf = sample_pdb();
    let pdb = PortablePdbFile::from_slice(&buf).unwrap();

    assert_eq!(
        pdb.get_guid(0).unwrap_err().kind(),
        FormatErrorKind::InvalidGuidIndex(0)
    );
    assert_eq!(pdb.get_guid(1).unwrap(), CSHARP_LANGUAGE);
}

#[test]
fn test_cross_document_method() {
    let mut builder = PortablePdbBuilder::new();
    let first = builder.add_document("Page.razor", CSHARP_LANGUAGE);
    builder.add_document("Page.razor.g.cs", CSHARP_LANGUAGE);
    let blob = encode_sequence_points(
        0,
        None,
        &[
            Point::visible(0, 1, 1, 1, 2),
            Point::Document { document: 2 },
            Point::visible(4, 2, 1, 2, 3),
        ],
    );
    let sequence_points = builder.add_blob(&blob);
    builder.add_method_row(first, sequence_points);

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::CrossDocumentMethod(1));
}

#[test]
fn test_method_with_unknown_document() {
    let mut builder = PortablePdbBuilder::new();
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.add_method_row(5, 0);

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(
        err.kind(),
        FormatErrorKind::InvalidRowIndex(TableType::Document, 5)
    );
}

#[test]
fn test_unsupported_table() {
    let mut builder = PortablePdbBuilder::new();
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    // TypeDef
    builder.declare_table(0x02, 1);

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::UnsupportedTable(0x02));
}

#[test]
fn test_missing_stream() {
    let mut builder = PortablePdbBuilder::new();
    builder.omit_stream("#GUID");

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::MissingStream("#GUID"));
}

#[test]
fn test_bad_signature() {
    let mut buf = sample_pdb();
    buf[0] = b'X';

    assert!(!PortablePdbFile::peek(&buf));
    let err = PortablePdbFile::from_vec(buf).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::MalformedHeader);
}

#[test]
fn test_duplicate_stream() {
    let mut builder = PortablePdbBuilder::new();
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.rename_stream("#US", "#~");

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::MalformedHeader);
}

#[test]
fn test_undefined_table_ids() {
    let mut builder = PortablePdbBuilder::new();
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.declare_table(0x38, 0);
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();
    assert_eq!(pdb.document_indices().len(), 1);

    builder.declare_table(0x3f, 1);
    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::UnsupportedTable(0x3f));
}

#[test]
fn test_invalid_variable_name() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let method = builder.add_method(document, &[Point::visible(0, 1, 1, 1, 2)]);
    builder.add_scope(method, 0, 4);
    builder.add_local_variable(b"x\xff", 0, 0);

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::InvalidStringData);
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_invalid_document_name() {
    // a path component that is not UTF-8
    let mut builder = PortablePdbBuilder::new();
    let component = builder.add_blob(b"foo\xff.cs");
    let mut name = vec![b'/'];
    write_compressed_u32(&mut name, component);
    let name = builder.add_blob(&name);
    builder.add_document_row(DocumentRow {
        name,
        ..Default::default()
    });

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::InvalidStringData);

    // a separator that is not UTF-8
    let mut builder = PortablePdbBuilder::new();
    let component = builder.add_blob(b"foo.cs");
    let mut name = vec![0xff];
    write_compressed_u32(&mut name, component);
    let name = builder.add_blob(&name);
    builder.add_document_row(DocumentRow {
        name,
        ..Default::default()
    });

    let err = PortablePdbFile::from_vec(builder.build()).unwrap_err();
    assert_eq!(err.kind(), FormatErrorKind::InvalidStringData);
}

#[test]
fn test_line_zero() {
    let mut builder = PortablePdbBuilder::new();
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    builder.add_method(document, &[Point::visible(0, 0, 0, 0, 1)]);
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    let method = &pdb.document_indices()[0].methods[0];
    assert_eq!(method.first_line, Some(0));
    assert_eq!(method.last_line, Some(0));
    assert!(!method.sequence_points[0].is_hidden);
}

#[test]
fn test_module_name() {
    let pdb = PortablePdbFile::from_vec(sample_pdb()).unwrap();
    assert_eq!(pdb.module_name(), None);

    let pdb = pdb.with_module_name("MyModule.dll");
    assert_eq!(pdb.module_name(), Some("MyModule.dll"));
    assert_eq!(pdb.document_indices().len(), 2);
}

#[test]
fn test_document_hash_and_paths() {
    let mut builder = PortablePdbBuilder::new();
    let hash = [0xAB; 32];
    builder.add_document_with_hash("C:\\src\\a.cs", CSHARP_LANGUAGE, SHA256_ALGORITHM, &hash);
    builder.add_document("/src/shared/b.cs", CSHARP_LANGUAGE);
    builder.add_document("/src/shared/c.cs", Uuid::nil());
    let name = builder.add_document_name_with_separator("whole path.cs", 0);
    builder.add_document_row(DocumentRow {
        name,
        ..Default::default()
    });
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    let documents = pdb.document_indices();
    assert_eq!(documents[0].file_path, "C:\\src\\a.cs");
    assert_eq!(documents[0].hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(documents[0].hash, hash);
    assert_eq!(pdb.get_hash(1).unwrap(), &hash[..]);
    assert_eq!(documents[1].file_path, "/src/shared/b.cs");
    assert_eq!(documents[2].file_path, "/src/shared/c.cs");
    assert_eq!(documents[2].language, Language::Unknown);
    assert_eq!(documents[2].language.to_string(), "unknown");
    assert_eq!(documents[3].file_path, "whole path.cs");
    assert_eq!(documents[3].language, Language::Unknown);

    let row = pdb.document_table().row(2).unwrap();
    assert_eq!(
        pdb.get_document_name(row.name).unwrap(),
        "/src/shared/b.cs"
    );
}

#[test]
fn test_pdb_stream() {
    let guid = Uuid::parse_str("9e9ad6c0-54e1-4a5d-9a1b-3c2d2c1f0e11").unwrap();
    let mut builder = PortablePdbBuilder::new();
    builder.pdb_id(guid, 0x1234_5678).entry_point(0x0600_0001);
    builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let pdb = PortablePdbFile::from_vec(builder.build()).unwrap();

    assert_eq!(pdb.pdb_id(), DebugId::from_parts(guid, 0x1234_5678));
    assert_eq!(pdb.entry_point(), Some(0x0600_0001));
    assert_eq!(pdb.root_header().version, "PDB v1.0");
    assert!(pdb.get_stream("#US").is_some());
    assert!(pdb.get_stream("#Foo").is_none());

    let pdb = PortablePdbFile::from_vec(PortablePdbBuilder::new().build()).unwrap();
    assert_eq!(pdb.entry_point(), None);
    assert!(!pdb.has_debug_info());
    assert!(pdb.document_indices().is_empty());
}

#[test]
fn test_wide_indices() {
    let narrow = PortablePdbFile::from_vec(sample_pdb()).unwrap();

    let mut builder = PortablePdbBuilder::new();
    builder
        .wide_heaps()
        .referenced_table(tables::METHOD_DEF, 0x1_0000);
    let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
    let method = builder.add_method(document, &[Point::visible(2, 4, 1, 4, 9)]);
    builder.add_scope(method, 0, 4);
    builder.add_local_variable("x", 0, 0);
    let wide = PortablePdbFile::from_vec(builder.build()).unwrap();

    assert_eq!(wide.metadata_header().heap_sizes, 0x07);
    let (_, method) = wide.find_method(method).unwrap();
    assert_eq!(method.local_scopes[0].local_variables[0].name, "x");
    assert_eq!(method.sequence_points[0].il_offset, 2);

    assert_eq!(narrow.metadata_header().heap_sizes, 0x00);
}

#[test]
fn test_open_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(&sample_pdb())?;

    let pdb = PortablePdbFile::open(tmp.path())?;
    assert_eq!(pdb.document_indices().len(), 2);
    assert_eq!(pdb.document_indices()[1].language, Language::FSharp);

    Ok(())
}

#[test]
fn test_shared_between_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PortablePdbFile<'static>>();

    let pdb = std::sync::Arc::new(PortablePdbFile::from_vec(sample_pdb()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pdb = pdb.clone();
            std::thread::spawn(move || pdb.find_method(1).map(|(_, m)| m.first_line))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(Some(10)));
    }
}
