pub const TOPIC_ROOM_PREFIX: &str = "heatpump/room/";
pub const TOPIC_ROOM_WILDCARD: &str = "heatpump/room/+/+";

pub const TOPIC_OUTDOOR_PRIMARY: &str = "heatpump/outdoor/primary";
pub const TOPIC_OUTDOOR_FALLBACK: &str = "heatpump/outdoor/fallback";

pub const TOPIC_LWT_ACTUAL: &str = "heatpump/lwt/actual";
pub const TOPIC_LWT_SETPOINT: &str = "heatpump/lwt/setpoint";

pub const TOPIC_CMD_MODE: &str = "heatpump/cmnd/mode";
pub const TOPIC_CMD_PAUSE: &str = "heatpump/cmnd/pause";

pub const TOPIC_CMD_SWITCH: &str = "heatpump/cmnd/switch";
pub const TOPIC_CMD_LWT_DEVIATION: &str = "heatpump/cmnd/lwt_deviation";

pub const TOPIC_CONTROLLER_STATE: &str = "heatpump/controller/state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomField {
    Current,
    Target,
    Setpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    Room { room: &'a str, field: RoomField },
    OutdoorPrimary,
    OutdoorFallback,
    LwtActual,
    LwtSetpoint,
    Mode,
    Pause,
}

pub fn parse_topic(topic: &str) -> Option<InboundTopic<'_>> {
    let parsed = match topic {
        TOPIC_OUTDOOR_PRIMARY => InboundTopic::OutdoorPrimary,
        TOPIC_OUTDOOR_FALLBACK => InboundTopic::OutdoorFallback,
        TOPIC_LWT_ACTUAL => InboundTopic::LwtActual,
        TOPIC_LWT_SETPOINT => InboundTopic::LwtSetpoint,
        TOPIC_CMD_MODE => InboundTopic::Mode,
        TOPIC_CMD_PAUSE => InboundTopic::Pause,
        _ => {
            let rest = topic.strip_prefix(TOPIC_ROOM_PREFIX)?;
            let (room, field) = rest.rsplit_once('/')?;
            if room.is_empty() || room.contains('/') {
                return None;
            }
            let field = match field {
                "current" => RoomField::Current,
                "target" => RoomField::Target,
                "setpoint" => RoomField::Setpoint,
                _ => return None,
            };
            InboundTopic::Room { room, field }
        }
    };
    Some(parsed)
}

pub fn room_setpoint_command_topic(room: &str) -> String {
    format!("heatpump/cmnd/room/{room}/setpoint")
}
