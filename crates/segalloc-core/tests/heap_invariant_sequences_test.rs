use segalloc_core::heap::block::DWORD;
use segalloc_core::{Heap, HeapConfig, HeapReport, SearchStart, VecArena};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    ptr: usize,
    size: usize,
    fill: u8,
}

fn assert_filled(heap: &Heap, slot: &Slot, context: &str) {
    let payload = heap.payload(slot.ptr).unwrap_or_else(|err| panic!("{context}: {err}"));
    assert!(payload.len() >= slot.size, "{context}: payload shrank");
    assert!(
        payload[..slot.size].iter().all(|&b| b == slot.fill),
        "{context}: payload of {:#x} was overwritten",
        slot.ptr
    );
}

fn assert_consistent(report: &HeapReport, live: usize, context: &str) {
    assert!(report.is_consistent(), "{context}\n{report}");
    assert_eq!(report.allocated_blocks, live, "{context}: live block count");
}

fn run_sequence(seed: u64, config: HeapConfig) {
    const STEPS: usize = 1_500;
    const SLOTS: usize = 32;

    let mut heap = Heap::new(VecArena::new(), config);
    heap.init().expect("init");
    let mut rng = XorShift64::new(seed);
    let mut slots: [Option<Slot>; SLOTS] = [None; SLOTS];
    let mut next_fill: u8 = 1;

    for step in 0..STEPS {
        let op = rng.gen_range_usize(0, 99);
        let idx = rng.gen_range_usize(0, SLOTS - 1);
        let size = if rng.gen_range_usize(0, 15) == 0 {
            rng.gen_range_usize(4096, 40_000)
        } else {
            rng.gen_range_usize(1, 512)
        };
        let context = format!("seed={seed} step={step} op={op} idx={idx} size={size}");

        match (op, slots[idx]) {
            // allocate (biased)
            (0..=49, None) => {
                let ptr = heap.allocate(size).expect("allocate");
                assert_eq!(ptr % DWORD, 0, "{context}: misaligned payload");
                let fill = next_fill;
                next_fill = next_fill.wrapping_add(1).max(1);
                heap.payload_mut(ptr).unwrap()[..size].fill(fill);
                slots[idx] = Some(Slot { ptr, size, fill });
            }
            // resize
            (50..=69, Some(slot)) => {
                assert_filled(&heap, &slot, &context);
                let ptr = heap.resize(slot.ptr, size).expect("resize");
                assert_eq!(ptr % DWORD, 0, "{context}: misaligned payload");
                let kept = slot.size.min(size);
                let payload = heap.payload_mut(ptr).unwrap();
                assert!(
                    payload[..kept].iter().all(|&b| b == slot.fill),
                    "{context}: resize lost data"
                );
                payload[..size].fill(slot.fill);
                slots[idx] = Some(Slot { ptr, size, ..slot });
            }
            // resize to zero frees
            (70..=72, Some(slot)) => {
                assert_eq!(heap.resize(slot.ptr, 0), None);
                slots[idx] = None;
            }
            // free
            (73..=99, Some(slot)) => {
                assert_filled(&heap, &slot, &context);
                heap.deallocate(slot.ptr);
                slots[idx] = None;
            }
            _ => continue,
        }

        let live = slots.iter().flatten().count();
        assert_consistent(&heap.check(), live, &context);
        if step % 100 == 0 {
            for slot in slots.iter().flatten() {
                assert_filled(&heap, slot, &context);
            }
        }
    }

    for slot in slots.iter().flatten() {
        assert_filled(&heap, slot, &format!("seed={seed} final"));
    }
    for slot in slots.iter_mut() {
        if let Some(s) = slot.take() {
            heap.deallocate(s.ptr);
        }
    }
    let report = heap.check();
    assert_consistent(&report, 0, &format!("seed={seed} drained"));
    assert_eq!(report.free_blocks, 1, "seed={seed}: drained heap should be one free block");
}

#[test]
fn deterministic_sequences_hold_heap_invariants() {
    for seed in [1, 2, 3, 4] {
        run_sequence(seed, HeapConfig::default());
    }
}

#[test]
fn canonical_search_sequences_hold_heap_invariants() {
    let config = HeapConfig::default().with_search_start(SearchStart::Canonical);
    for seed in [11, 12] {
        run_sequence(seed, config);
    }
}

#[test]
fn small_chunk_sequences_hold_heap_invariants() {
    let config = HeapConfig::default()
        .with_chunk_size(64)
        .with_resize_factor(1);
    for seed in [21, 22] {
        run_sequence(seed, config);
    }
}
