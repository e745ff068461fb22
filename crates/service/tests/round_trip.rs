use chrono::{DateTime, Duration, Utc};
use codec::{MetadataCodec, MetadataKey};
use ledger::StatusLedger;
use parcel_track_core::{DeliveryMeta, DeliveryStatus};
use proptest::prelude::*;
use service::DeliveryService;

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
}

fn delivery_meta() -> impl Strategy<Value = DeliveryMeta> {
    (
        "[A-Za-z0-9x]{1,42}",
        "\\PC{1,64}",
        timestamp(),
        proptest::option::of(0i64..10_000_000),
    )
        .prop_filter("parties must not be blank", |(s, r, _, _)| {
            !s.trim().is_empty() && !r.trim().is_empty()
        })
        .prop_map(|(sender, recipient, dispatch_time, transit_secs)| DeliveryMeta {
            sender,
            recipient,
            dispatch_time,
            delivery_time: transit_secs.map(|s| dispatch_time + Duration::seconds(s)),
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn metadata_survives_encrypt_and_decrypt(meta in delivery_meta()) {
        let codec = MetadataCodec::new(&MetadataKey::generate());
        let blob = codec.encrypt(&serde_json::to_vec(&meta).unwrap()).unwrap();
        let back: DeliveryMeta = serde_json::from_slice(&codec.decrypt(&blob).unwrap()).unwrap();
        prop_assert_eq!(back, meta);
    }

    #[test]
    fn service_returns_what_was_stored(meta in delivery_meta()) {
        let svc = DeliveryService::new(
            StatusLedger::temporary().unwrap(),
            MetadataCodec::new(&MetadataKey::generate()),
        );
        let initial = DeliveryMeta { delivery_time: None, ..meta.clone() };
        svc.create_delivery("PKG-PROP", &initial).unwrap();
        prop_assert_eq!(svc.get_delivery("PKG-PROP").unwrap().meta, initial.clone());

        if meta.delivery_time.is_some() {
            svc.update_status("PKG-PROP", DeliveryStatus::InTransit, &initial).unwrap();
            svc.update_status("PKG-PROP", DeliveryStatus::Delivered, &meta).unwrap();
            prop_assert_eq!(svc.get_delivery("PKG-PROP").unwrap().meta, meta);
        }
    }
}
