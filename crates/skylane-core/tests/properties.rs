//! Property tests for the filter and the ack window.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use skylane_core::protocol::filter::PacketFilter;
use skylane_core::protocol::messages::{MAX_PACKET_BYTES, MIN_PACKET_BYTES};
use skylane_core::protocol::Address;
use skylane_core::reliability::{AckTracker, ReceiveWindow, STALE_SEQUENCE_THRESHOLD};

fn address_strategy() -> impl Strategy<Value = Address> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>()).prop_map(|(ip, port)| Address::V4 { ip, port }),
        (any::<[u8; 16]>(), any::<u16>()).prop_map(|(ip, port)| Address::V6 { ip, port }),
    ]
}

fn random_address(rng: &mut StdRng) -> Address {
    if rng.gen() {
        Address::V4 { ip: rng.gen(), port: rng.gen() }
    } else {
        Address::V6 { ip: rng.gen(), port: rng.gen() }
    }
}

#[test]
fn test_filter_rejects_random_buffers() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..10_000 {
        let filter = PacketFilter::new(rng.gen());
        let from = random_address(&mut rng);
        let to = random_address(&mut rng);
        let len = rng.gen_range(MIN_PACKET_BYTES..=MAX_PACKET_BYTES);
        let mut buf = vec![0u8; len];
        rng.fill(buf.as_mut_slice());

        // Each stage must reject noise on its own
        assert!(!PacketFilter::basic(&buf));
        assert!(!filter.advanced(&buf, &from, &to));
        assert!(!filter.accepts(&buf, &from, &to));
    }
}

#[test]
fn test_basic_rejects_noise_with_valid_header() {
    let mut rng = StdRng::seed_from_u64(0xB45C);

    for _ in 0..10_000 {
        let len = rng.gen_range(MIN_PACKET_BYTES..=MAX_PACKET_BYTES);
        let mut buf = vec![0u8; len];
        rng.fill(buf.as_mut_slice());
        buf[0] = 0;
        buf[1] = rng.gen_range(0..=1);
        assert!(!PacketFilter::basic(&buf));
    }
}

proptest! {
    #[test]
    fn stamped_packets_pass_the_filter(
        magic in any::<[u8; 8]>(),
        from in address_strategy(),
        to in address_strategy(),
        len in MIN_PACKET_BYTES..=MAX_PACKET_BYTES,
        packet_type in 0u8..=1,
    ) {
        let filter = PacketFilter::new(magic);
        let mut packet = vec![0u8; len];
        packet[1] = packet_type;
        filter.stamp(&mut packet, &from, &to);

        prop_assert!(PacketFilter::basic(&packet));
        prop_assert!(filter.advanced(&packet, &from, &to));
    }

    #[test]
    fn acks_report_exactly_the_delivered_sequences(
        base in 0u64..1_000_000,
        offsets in prop::collection::btree_set(1u64..=STALE_SEQUENCE_THRESHOLD, 1..64),
    ) {
        let mut window = ReceiveWindow::new(base);
        let mut order: Vec<u64> = offsets.iter().map(|o| base + o).collect();
        order.reverse();
        for sequence in &order {
            prop_assert!(window.receive(*sequence).is_fresh());
        }

        let mut tracker = AckTracker::new();
        let confirmed: BTreeSet<u64> = tracker
            .process_acks(window.sequence(), &window.ack_bits())
            .into_iter()
            .collect();
        let delivered: BTreeSet<u64> = order.into_iter().collect();
        prop_assert_eq!(confirmed, delivered);

        // A repeated ack pair confirms nothing new
        prop_assert!(tracker.process_acks(window.sequence(), &window.ack_bits()).is_empty());
    }
}
