use dmxbus_core::{
    Direction, DirtyRange, DriverSpec, FactoryDriver, InputMirror, OutputStage, PropertyList,
    Registry, UniverseBackend, MAX_UNIVERSES, SLOTS_PER_UNIVERSE,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

struct Staged(OutputStage);

impl UniverseBackend for Staged {
    fn write_slots(&self, offset: usize, data: &[u8]) -> dmxbus_core::Result<usize> {
        Ok(self.0.write(offset, data))
    }

    fn read_slots(&self, offset: usize, buf: &mut [u8]) -> dmxbus_core::Result<usize> {
        Ok(self.0.read(offset, buf))
    }
}

fn write_op() -> impl Strategy<Value = (usize, Vec<u8>)> {
    (0..SLOTS_PER_UNIVERSE, prop::collection::vec(any::<u8>(), 1..64))
}

proptest! {
    #[test]
    fn prop_flush_covers_exactly_written_hull(writes in prop::collection::vec(write_op(), 1..20)) {
        let stage = OutputStage::new();
        let mut expected = [0u8; SLOTS_PER_UNIVERSE];
        let mut hull = DirtyRange::Clean;

        for (offset, data) in &writes {
            let len = stage.write(*offset, data);
            prop_assert!(offset + len <= SLOTS_PER_UNIVERSE);
            expected[*offset..offset + len].copy_from_slice(&data[..len]);
            hull.extend(*offset, len);
        }

        let flush = stage.take_dirty().unwrap();
        let range = hull.range().unwrap();
        prop_assert_eq!(flush.range(), range.clone());
        prop_assert_eq!(&flush.data[..], &expected[range]);
        prop_assert!(stage.take_dirty().is_none());
    }

    #[test]
    fn prop_writes_never_touch_bytes_outside_request(offset in 0..SLOTS_PER_UNIVERSE, data in prop::collection::vec(1u8..=255, 1..600)) {
        let stage = OutputStage::new();
        let len = stage.write(offset, &data);
        prop_assert_eq!(len, data.len().min(SLOTS_PER_UNIVERSE - offset));

        let mut all = [0u8; SLOTS_PER_UNIVERSE];
        stage.read(0, &mut all);
        prop_assert!(all[..offset].iter().all(|&b| b == 0));
        prop_assert!(all[offset + len..].iter().all(|&b| b == 0));
    }

    #[test]
    fn prop_identical_sample_is_silent(frame in prop::collection::vec(any::<u8>(), SLOTS_PER_UNIVERSE)) {
        let mirror = InputMirror::new();
        mirror.sample(&frame);
        prop_assert!(mirror.sample(&frame).is_none());
    }

    #[test]
    fn prop_mirror_span_bounds_every_difference(
        before in prop::collection::vec(any::<u8>(), SLOTS_PER_UNIVERSE),
        after in prop::collection::vec(any::<u8>(), SLOTS_PER_UNIVERSE),
    ) {
        let mirror = InputMirror::new();
        mirror.sample(&before);
        let span = mirror.sample(&after);

        let diffs: Vec<usize> = (0..SLOTS_PER_UNIVERSE).filter(|&i| before[i] != after[i]).collect();
        match span {
            None => prop_assert!(diffs.is_empty()),
            Some(span) => {
                prop_assert_eq!(span.start, diffs[0]);
                prop_assert_eq!(span.end, diffs[diffs.len() - 1] + 1);
            }
        }
    }

    #[test]
    fn prop_universe_indices_unique(ops in prop::collection::vec((any::<bool>(), any::<bool>(), 0usize..8), 1..80)) {
        let registry = Registry::new();
        let family = registry.create_family("prop").unwrap();
        let driver = registry
            .create_driver(
                family,
                DriverSpec::new(
                    "staged",
                    Arc::new(FactoryDriver::new(|_| {
                        Ok(Arc::new(Staged(OutputStage::new())) as Arc<dyn UniverseBackend>)
                    })),
                ),
            )
            .unwrap();
        let interface = registry.create_interface(driver, PropertyList::new()).unwrap();
        let mut live = Vec::new();

        for (create, output, pick) in ops {
            let direction = if output { Direction::Output } else { Direction::Input };
            if create || live.is_empty() {
                if let Ok(u) = registry.create_universe(interface, direction, PropertyList::new()) {
                    live.push(u.id());
                }
            } else {
                let id = live.remove(pick % live.len());
                registry.delete_universe(id).unwrap();
            }

            for d in Direction::ALL {
                let indices: Vec<usize> = registry.universes(d).iter().map(|u| u.index()).collect();
                let unique: HashSet<usize> = indices.iter().copied().collect();
                prop_assert_eq!(unique.len(), indices.len());
                prop_assert!(indices.iter().all(|&i| i < MAX_UNIVERSES));
            }
        }
    }
}

#[test]
fn test_two_writes_give_five_to_eleven() {
    let stage = OutputStage::new();
    stage.write(10, &[9]);
    stage.write(5, &[8]);
    assert_eq!(stage.dirty(), DirtyRange::Dirty { start: 5, end: 11 });
    assert_eq!(stage.dirty().len(), 6);
}
