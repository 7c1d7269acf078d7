use crate::proto::Event;

/// Flattens an event that batches several bodies into one event per body.
///
/// The inline body (if any) comes first and is left as is. Each embedded
/// body then gets its own copy of the envelope with `body` replaced and
/// `event_type` set to the body's own type. The returned events never carry
/// `bodies`.
pub fn split_event_bodies(mut event: Event) -> Vec<Event> {
    let bodies = std::mem::take(&mut event.bodies);
    let mut units = Vec::with_capacity(bodies.len() + 1);
    if event.body.is_some() {
        units.push(event.clone());
    }
    for body in bodies {
        let mut unit = event.clone();
        unit.event_type = body.event_type;
        unit.body = Some(body);
        units.push(unit);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{EventBody, EventType, GroupId};
    use serde_json::json;

    fn body(kind: EventType) -> EventBody {
        EventBody {
            event_type: Some(kind),
            ..Default::default()
        }
    }

    #[test_timeout::timeout]
    fn inline_body_first_then_embedded_in_wire_order() {
        let event = Event {
            group_id: Some(GroupId::space("AAA")),
            event_type: Some(EventType::MessagePosted),
            body: Some(EventBody {
                event_type: Some(EventType::MessagePosted),
                message_posted: Some(json!([["m1"]])),
                ..Default::default()
            }),
            bodies: vec![
                body(EventType::TypingStateChanged),
                body(EventType::ReadReceiptChanged),
            ],
            timestamp_usec: Some(42),
            ..Default::default()
        };

        let units = split_event_bodies(event.clone());
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|unit| unit.bodies.is_empty()));
        assert!(units.iter().all(|unit| unit.timestamp_usec == Some(42)));
        assert!(units.iter().all(|unit| unit.group_id == event.group_id));

        assert_eq!(units[0].event_type, Some(EventType::MessagePosted));
        assert_eq!(units[0].body, event.body);
        assert_eq!(units[1].event_type, Some(EventType::TypingStateChanged));
        assert_eq!(units[1].body, Some(body(EventType::TypingStateChanged)));
        assert_eq!(units[2].event_type, Some(EventType::ReadReceiptChanged));
    }

    #[test_timeout::timeout]
    fn embedded_only_events_drop_the_missing_inline_body() {
        let event = Event {
            event_type: Some(EventType::Unknown),
            bodies: vec![body(EventType::GroupViewed)],
            ..Default::default()
        };
        let units = split_event_bodies(event);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].event_type, Some(EventType::GroupViewed));
    }

    #[test_timeout::timeout]
    fn event_without_bodies_yields_nothing() {
        assert!(split_event_bodies(Event::default()).is_empty());
    }
}
