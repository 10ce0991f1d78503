//! Wire form properties.

use event_relay::broker::topology::topic_matches;
use event_relay::{Event, RoutingKey, Severity};
use proptest::prelude::*;

proptest! {
    #[test]
    fn event_survives_the_wire(name in any::<String>(), data in any::<String>()) {
        let event = Event::new(name, data);
        let bytes = event.to_wire().unwrap();
        prop_assert_eq!(Event::from_wire(&bytes).unwrap(), event);
    }

    #[test]
    fn control_characters_survive_the_wire(data in "[\\x00-\\x1f\\x7f]*") {
        let event = Event::log(data);
        let bytes = event.to_wire().unwrap();
        prop_assert_eq!(Event::from_wire(&bytes).unwrap(), event);
    }
}

#[test]
fn empty_fields_survive_the_wire() {
    let event = Event::new("", "");
    assert_eq!(Event::from_wire(&event.to_wire().unwrap()).unwrap(), event);
}

#[test]
fn default_bindings_cover_every_emitted_key() {
    let bindings = RoutingKey::log_bindings();
    for severity in Severity::ALL {
        let key = RoutingKey::log(severity);
        assert!(
            bindings.iter().any(|pattern| topic_matches(pattern, key.as_str())),
            "{key} is not bound"
        );
    }
}
