#![no_main]

// cargo +nightly fuzz run fuzz_ppdb -j 12 -- -max_len=16777216 # 16M
libfuzzer_sys::fuzz_target!(|data: &[u8]| {
    if let Ok(pdb) = ppdb_reader::PortablePdbFile::from_slice(data) {
        for document in pdb.document_indices() {
            for method in &document.methods {
                assert!(pdb.find_method(method.method_def).is_some());
                let mut prev = 0;
                for sp in &method.sequence_points {
                    assert!(sp.il_offset >= prev);
                    prev = sp.il_offset;
                }
            }
        }
    }
});

// This mutator makes sure we always have a valid file magic.
libfuzzer_sys::fuzz_mutator!(
    |data: &mut [u8], size: usize, max_size: usize, _seed: u32| {
        let new_size = libfuzzer_sys::fuzzer_mutate(data, size, max_size);

        let magic = 0x424A_5342u32.to_le_bytes();
        let len = magic.len().min(data.len());
        data[..len].copy_from_slice(&magic[..len]);

        new_size
    }
);
