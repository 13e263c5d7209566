#![no_main]
use libfuzzer_sys::fuzz_target;
use segalloc_core::heap::block::DWORD;
use segalloc_core::{ArenaProvider, Heap, HeapConfig, VecArena};

const MAX_LIVE: usize = 64;

fuzz_target!(|data: &[u8]| {
    // Byte stream as a sequence of allocate/free/resize operations.
    if data.len() < 4 {
        return;
    }

    let config = HeapConfig::default().with_log_level(None);
    let mut heap = Heap::new(VecArena::with_limit(1 << 22), config);
    if heap.init().is_err() {
        return;
    }
    let mut allocations: Vec<(usize, usize, u8)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 4;
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let fill = chunk[3];

        match op {
            0 if allocations.len() < MAX_LIVE => {
                if let Some(ptr) = heap.allocate(size) {
                    heap.payload_mut(ptr).unwrap()[..size].fill(fill);
                    allocations.push((ptr, size, fill));
                }
            }
            1 if !allocations.is_empty() => {
                let idx = usize::from(fill) % allocations.len();
                let (ptr, size, fill) = allocations.swap_remove(idx);
                assert!(heap.payload(ptr).unwrap()[..size].iter().all(|&b| b == fill));
                heap.deallocate(ptr);
            }
            2 if !allocations.is_empty() => {
                let idx = usize::from(fill) % allocations.len();
                let (ptr, old_size, old_fill) = allocations[idx];
                match heap.try_resize(ptr, size) {
                    Ok(Some(new_ptr)) => {
                        let kept = old_size.min(size);
                        let payload = heap.payload_mut(new_ptr).unwrap();
                        assert!(payload[..kept].iter().all(|&b| b == old_fill));
                        payload[..size].fill(old_fill);
                        allocations[idx] = (new_ptr, size, old_fill);
                    }
                    Ok(None) => {
                        allocations.swap_remove(idx);
                    }
                    Err(_) => {
                        let payload = heap.payload(ptr).unwrap();
                        assert!(payload[..old_size].iter().all(|&b| b == old_fill));
                    }
                }
            }
            _ => {
                // Misaligned and past-the-break frees must be rejected.
                let stray = match allocations.first() {
                    Some(&(ptr, _, _)) if fill % 2 == 0 => {
                        ptr + 1 + usize::from(chunk[1]) % (DWORD - 1)
                    }
                    _ => heap.arena().len() + usize::from(chunk[1]) * DWORD,
                };
                assert!(heap.try_deallocate(stray).is_err());
            }
        }

        let report = heap.check();
        assert!(report.is_consistent(), "{report}");
        assert_eq!(report.allocated_blocks, allocations.len());
    }

    for (ptr, _, _) in allocations {
        heap.deallocate(ptr);
    }
    assert!(heap.check().is_consistent());
});
