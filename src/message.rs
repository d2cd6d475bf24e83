//! Wire codec for the protocol's JSON array frames.
//!
//! Every frame is a JSON array whose first element is a string tag. The
//! codec tokenizes the sequence directly instead of reflecting over a
//! `Value` tree, so the variadic `REQ` grammar and the fixed arity of the
//! other frames are enforced while parsing.

use std::fmt;

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::event::Event;
use crate::filter::Filter;

/// Client → relay frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event { event: Event },
    /// `["REQ", <sub_id>, <filter>...]`
    Req { id: String, filters: Vec<Filter> },
    /// `["CLOSE", <sub_id>]`
    Close { id: String },
}

/// Relay → client frames.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <sub_id>, <event>]`
    Event { subscription_id: String, event: Event },
    /// `["EOSE", <sub_id>]`
    Eose { subscription_id: String },
    /// `["NOTICE", <message>]`
    Notice { message: String },
}

impl RelayMessage {
    pub fn notice(message: impl Into<String>) -> Self {
        RelayMessage::Notice {
            message: message.into(),
        }
    }
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Event { event } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(event)?;
                seq.end()
            }
            ClientMessage::Req { id, filters } => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            ClientMessage::Close { id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("CLOSE")?;
                seq.serialize_element(id)?;
                seq.end()
            }
        }
    }
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(subscription_id)?;
                seq.serialize_element(event)?;
                seq.end()
            }
            RelayMessage::Eose { subscription_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EOSE")?;
                seq.serialize_element(subscription_id)?;
                seq.end()
            }
            RelayMessage::Notice { message } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("NOTICE")?;
                seq.serialize_element(message)?;
                seq.end()
            }
        }
    }
}

fn required<'de, T, A>(seq: &mut A, index: usize) -> Result<T, A::Error>
where
    T: Deserialize<'de>,
    A: SeqAccess<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, &"a complete protocol frame"))
}

/// Fixed-arity frames reject trailing elements.
fn reject_rest<'de, A: SeqAccess<'de>>(seq: &mut A) -> Result<(), A::Error> {
    if seq.next_element::<IgnoredAny>()?.is_some() {
        return Err(de::Error::custom("unexpected extra frame element"));
    }
    Ok(())
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FrameVisitor;

        impl<'de> Visitor<'de> for FrameVisitor {
            type Value = ClientMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an EVENT, REQ or CLOSE frame")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let tag: String = required(&mut seq, 0)?;
                match tag.as_str() {
                    "EVENT" => {
                        let event = required(&mut seq, 1)?;
                        reject_rest(&mut seq)?;
                        Ok(ClientMessage::Event { event })
                    }
                    "REQ" => {
                        let id = required(&mut seq, 1)?;
                        let mut filters = Vec::new();
                        while let Some(filter) = seq.next_element::<Filter>()? {
                            filters.push(filter);
                        }
                        Ok(ClientMessage::Req { id, filters })
                    }
                    "CLOSE" => {
                        let id = required(&mut seq, 1)?;
                        reject_rest(&mut seq)?;
                        Ok(ClientMessage::Close { id })
                    }
                    other => Err(de::Error::unknown_variant(other, &["EVENT", "REQ", "CLOSE"])),
                }
            }
        }

        deserializer.deserialize_seq(FrameVisitor)
    }
}

impl<'de> Deserialize<'de> for RelayMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FrameVisitor;

        impl<'de> Visitor<'de> for FrameVisitor {
            type Value = RelayMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an EVENT, EOSE or NOTICE frame")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let tag: String = required(&mut seq, 0)?;
                match tag.as_str() {
                    "EVENT" => {
                        let subscription_id = required(&mut seq, 1)?;
                        let event = required(&mut seq, 2)?;
                        reject_rest(&mut seq)?;
                        Ok(RelayMessage::Event {
                            subscription_id,
                            event,
                        })
                    }
                    "EOSE" => {
                        let subscription_id = required(&mut seq, 1)?;
                        reject_rest(&mut seq)?;
                        Ok(RelayMessage::Eose { subscription_id })
                    }
                    "NOTICE" => {
                        let message = required(&mut seq, 1)?;
                        reject_rest(&mut seq)?;
                        Ok(RelayMessage::Notice { message })
                    }
                    other => Err(de::Error::unknown_variant(other, &["EVENT", "EOSE", "NOTICE"])),
                }
            }
        }

        deserializer.deserialize_seq(FrameVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_event_frame() {
        let frame = r#"["EVENT",{"id":"","pubkey":"","created_at":7,"kind":1,"tags":[],"content":"hi","sig":""}]"#;
        let msg: ClientMessage = serde_json::from_str(frame).unwrap();
        match msg {
            ClientMessage::Event { event } => {
                assert_eq!(event.kind, 1);
                assert_eq!(event.content, "hi");
                assert_eq!(event.created_at, 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_req_is_variadic() {
        let msg: ClientMessage =
            serde_json::from_str(r##"["REQ","sub1",{"kinds":[1]},{"#q":["bar"]}]"##).unwrap();
        match msg {
            ClientMessage::Req { id, filters } => {
                assert_eq!(id, "sub1");
                assert_eq!(filters.len(), 2);
                assert_eq!(filters[0].kinds, vec![1]);
                assert_eq!(filters[1].tag_filters["q"], vec!["bar"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        // zero filters is still a valid REQ
        let msg: ClientMessage = serde_json::from_str(r#"["REQ","sub2"]"#).unwrap();
        assert!(matches!(msg, ClientMessage::Req { ref id, ref filters } if id == "sub2" && filters.is_empty()));
    }

    #[test]
    fn parse_close_frame() {
        let msg: ClientMessage = serde_json::from_str(r#"["CLOSE","sub1"]"#).unwrap();
        assert!(matches!(msg, ClientMessage::Close { ref id } if id == "sub1"));
    }

    #[test]
    fn fixed_arity_rejects_extra_elements() {
        assert!(serde_json::from_str::<ClientMessage>(r#"["CLOSE","sub1","junk"]"#).is_err());
        assert!(serde_json::from_str::<RelayMessage>(r#"["EOSE","sub1","junk"]"#).is_err());
    }

    #[test]
    fn unknown_tags_and_shapes_are_invalid() {
        assert!(serde_json::from_str::<ClientMessage>(r#"["AUTH","x"]"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"EVENT":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"[]"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"["EVENT"]"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn encode_client_frames() {
        let msg = ClientMessage::Req {
            id: "s".into(),
            filters: vec![Filter::default()],
        };
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"["REQ","s",{}]"#);

        let msg = ClientMessage::Close { id: "s".into() };
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"["CLOSE","s"]"#);
    }

    #[test]
    fn relay_frames_round_trip() {
        let event = Event {
            kind: 1,
            content: "hello".into(),
            ..Default::default()
        };
        for msg in [
            RelayMessage::Event {
                subscription_id: "s".into(),
                event,
            },
            RelayMessage::Eose {
                subscription_id: "s".into(),
            },
            RelayMessage::notice("slow down"),
        ] {
            let json = serde_json::to_string(&msg).unwrap();
            let back: RelayMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, msg);
        }
    }
}
