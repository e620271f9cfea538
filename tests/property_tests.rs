//! Property-based tests for entity-feed
//!
//! These tests verify invariants that must hold for all inputs:
//! - Incomplete entity datasources never subscribe
//! - Static datasources never carry server-side filtering
//! - Requested keys are always stripped to name, type and scripts
//! - Realtime windows always end at the clock they were advanced to
//!
//! Run with: cargo test --test property_tests

mod common;

use std::sync::Arc;

use common::Recorder;
use entity_feed::{
    build_subscription_options, DataKey, DataKeyType, Datasource, EntityDataListener,
    EntityFilter, EntityId, FeedConfig, MemoryTransport, PageLink, SourceOptions,
    SubscriptionCoordinator, SubscriptionMode, SubscriptionTimewindow,
};
use proptest::prelude::*;

fn arb_mode() -> impl Strategy<Value = SubscriptionMode> {
    prop_oneof![
        Just(SubscriptionMode::PageSnapshot),
        Just(SubscriptionMode::TimeSeries)
    ]
}

fn arb_key_type() -> impl Strategy<Value = DataKeyType> {
    prop_oneof![
        Just(DataKeyType::Timeseries),
        Just(DataKeyType::Attribute),
        Just(DataKeyType::Function),
        Just(DataKeyType::EntityField),
    ]
}

prop_compose! {
    fn arb_data_key()(
        name in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
        key_type in arb_key_type(),
        label in proptest::option::of("[A-Za-z ]{1,20}"),
        color in proptest::option::of("#[0-9a-f]{6}"),
        decimals in proptest::option::of(0u8..6),
        func_body in proptest::option::of("return [a-z]{1,10};"),
        post_func_body in proptest::option::of("return value;"),
    ) -> DataKey {
        DataKey {
            name,
            key_type,
            label,
            color,
            units: Some("unit".into()),
            decimals,
            settings: serde_json::json!({"hidden": false}),
            func_body,
            post_func_body,
        }
    }
}

fn arb_filter() -> impl Strategy<Value = EntityFilter> {
    prop_oneof![
        "[a-z0-9-]{1,12}".prop_map(|id| EntityFilter::SingleEntity {
            single_entity: EntityId::new("device", id)
        }),
        "[a-z]{1,8}".prop_map(|t| EntityFilter::EntityType { entity_type: t }),
    ]
}

fn arb_page_link() -> impl Strategy<Value = PageLink> {
    (0u32..50, 1u32..100).prop_map(|(page, size)| PageLink::new(page, size))
}

fn listener(mode: SubscriptionMode, datasource: Datasource) -> EntityDataListener {
    EntityDataListener::new(mode, datasource, 0, Arc::new(Recorder::default()))
}

mod subscribability {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: an entity datasource missing its filter or page link
        /// never creates a subscription or touches the transport
        #[test]
        fn incomplete_entity_source_never_subscribes(
            mode in arb_mode(),
            filter in proptest::option::of(arb_filter()),
            page_link in proptest::option::of(arb_page_link()),
            keys in proptest::collection::vec(arb_data_key(), 0..4),
        ) {
            prop_assume!(filter.is_none() || page_link.is_none());

            tokio_test::block_on(async {
                let transport = Arc::new(MemoryTransport::new());
                let coordinator =
                    SubscriptionCoordinator::new(transport.clone(), FeedConfig::default());

                let mut l = listener(mode, Datasource::entity(filter, page_link.clone(), keys));
                let prepared = coordinator.prepare_subscription(&mut l).await.unwrap();
                prop_assert!(prepared.is_none());

                let created = coordinator
                    .subscribe_for_latest_data(&mut l, page_link, vec![])
                    .unwrap();
                prop_assert!(!created);
                prop_assert!(l.subscription().is_none());
                prop_assert!(transport.registered_ids().is_empty());
                Ok(())
            })?;
        }
    }
}

mod options_building {
    use super::*;

    proptest! {
        /// Invariant: static datasources never carry a filter, page link or
        /// key filters, whatever the caller passes
        #[test]
        fn static_source_has_no_filtering(
            mode in arb_mode(),
            keys in proptest::collection::vec(arb_data_key(), 0..6),
            page_link in proptest::option::of(arb_page_link()),
            is_latest in any::<bool>(),
        ) {
            let l = listener(mode, Datasource::function(keys));
            let options = build_subscription_options(&l, page_link.as_ref(), &[], is_latest);

            prop_assert_eq!(&options.source, &SourceOptions::Static);
            prop_assert!(options.entity_filter().is_none());
            prop_assert!(options.page_link().is_none());
            prop_assert!(options.key_filters().is_empty());
            prop_assert_eq!(options.is_latest, is_latest);
        }

        /// Invariant: keys keep exactly name, type and the two scripts, in order
        #[test]
        fn keys_are_stripped_in_order(
            keys in proptest::collection::vec(arb_data_key(), 0..6),
            filter in arb_filter(),
            page_link in arb_page_link(),
        ) {
            let l = listener(
                SubscriptionMode::PageSnapshot,
                Datasource::entity(Some(filter), Some(page_link.clone()), keys.clone()),
            );
            let options = build_subscription_options(&l, Some(&page_link), &[], false);

            prop_assert_eq!(options.data_keys.len(), keys.len());
            for (stripped, original) in options.data_keys.iter().zip(&keys) {
                prop_assert_eq!(&stripped.name, &original.name);
                prop_assert_eq!(stripped.key_type, original.key_type);
                prop_assert_eq!(&stripped.func_body, &original.func_body);
                prop_assert_eq!(&stripped.post_func_body, &original.post_func_body);

                let json = serde_json::to_value(stripped).unwrap();
                let fields = json.as_object().unwrap();
                let only_known_fields = fields.keys().all(|k| {
                    matches!(k.as_str(), "name" | "type" | "funcBody" | "postFuncBody")
                });
                prop_assert!(only_known_fields);
            }
        }
    }
}

mod timewindow {
    use super::*;

    proptest! {
        /// Invariant: an advanced realtime window starts at or before
        /// `now - window` and by less than one interval
        #[test]
        fn advance_bounds(
            window_ms in 1i64..86_400_000,
            interval_ms in 1i64..3_600_000,
            now in 0i64..4_000_000_000_000,
            tick_align in any::<bool>(),
        ) {
            let mut window = SubscriptionTimewindow::realtime(window_ms, interval_ms, 0);
            window.tick_align = tick_align;
            window.advance(now);

            let unaligned = now - window_ms;
            prop_assert!(window.start_ts <= unaligned);
            prop_assert!(unaligned - window.start_ts < interval_ms);
            if !tick_align {
                prop_assert_eq!(window.start_ts, unaligned);
            }
            prop_assert!(window.contains(now));
        }
    }
}
