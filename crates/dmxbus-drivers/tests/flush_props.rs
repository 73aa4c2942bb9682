//! The device image after a flush always matches what the application wrote

use dmxbus_core::{Direction, DriverSpec, PropertyList, Registry};
use dmxbus_drivers::{membus, MembusDriver, MemoryTransport, SlotTransport};
use proptest::prelude::*;
use std::sync::Arc;

fn write_strategy() -> impl Strategy<Value = Vec<(usize, Vec<u8>)>> {
    prop::collection::vec(
        (0usize..512, prop::collection::vec(any::<u8>(), 1..40)),
        0..12,
    )
}

proptest! {
    #[test]
    fn prop_device_matches_staged_after_tick(
        rounds in prop::collection::vec(write_strategy(), 1..4),
        failing_round in prop::option::of(0usize..4),
    ) {
        let registry = Registry::new();
        let transport = Arc::new(MemoryTransport::new(1, 0));
        let shared = Arc::clone(&transport);
        let driver = Arc::new(MembusDriver::new(move |_| {
            Ok(Arc::clone(&shared) as Arc<dyn SlotTransport>)
        }));
        let family = registry.create_family(membus::FAMILY).unwrap();
        let driver_id = registry
            .create_driver(family, DriverSpec::new(membus::MEMORY_DRIVER, driver.clone()))
            .unwrap();
        let interface = registry.create_interface(driver_id, PropertyList::new()).unwrap();
        let universe = registry
            .create_universe(interface, Direction::Output, PropertyList::new())
            .unwrap();
        let iface = driver.interfaces().remove(0);

        let mut expected = [0u8; 512];
        for (round, writes) in rounds.iter().enumerate() {
            for (offset, data) in writes {
                let n = universe.write_slots(*offset, data).unwrap();
                expected[*offset..*offset + n].copy_from_slice(&data[..n]);
            }
            if failing_round == Some(round) {
                transport.fail_next(1);
                let _ = iface.tick();
            }
        }
        iface.tick().unwrap();

        prop_assert_eq!(transport.output(0).unwrap(), expected);
        for transfer in transport.take_transfers() {
            prop_assert!(transfer.offset + transfer.data.len() <= 512);
        }
    }
}
