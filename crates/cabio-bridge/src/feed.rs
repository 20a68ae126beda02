//! Feed topics.
//!
//! Every device cloud topic has the shape `<broker-username>/feeds/<name>`.
//! The feed name is matched exactly against the known set; an unknown
//! suffix is not routed (so `relay` can never be confused with a
//! `relay_home`-style topic).

/// One message category on the per-user topic namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Temperature,
    Humidity,
    Location,
    History,
    Relay,
    Ip,
    Firmware,
    /// Device registration announcements.
    DeviceId,
}

impl Feed {
    /// Every feed a user session subscribes to.
    pub const ALL: [Feed; 8] = [
        Feed::Temperature,
        Feed::Humidity,
        Feed::Location,
        Feed::History,
        Feed::Relay,
        Feed::Ip,
        Feed::Firmware,
        Feed::DeviceId,
    ];

    /// Topic suffix for this feed.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Temperature => "temperature",
            Feed::Humidity => "humidity",
            Feed::Location => "location",
            Feed::History => "history",
            Feed::Relay => "relay",
            Feed::Ip => "ip",
            Feed::Firmware => "firmware",
            Feed::DeviceId => "device_id",
        }
    }

    /// Parse a feed from a full topic. Returns `None` for topics outside
    /// the `<broker-username>/feeds/<name>` namespace or with an unknown
    /// feed name.
    pub fn from_topic(topic: &str) -> Option<Feed> {
        let (_, name) = topic.rsplit_once("/feeds/")?;
        match name {
            "temperature" => Some(Feed::Temperature),
            "humidity" => Some(Feed::Humidity),
            "location" => Some(Feed::Location),
            "history" => Some(Feed::History),
            "relay" => Some(Feed::Relay),
            "ip" => Some(Feed::Ip),
            "firmware" => Some(Feed::Firmware),
            "device_id" => Some(Feed::DeviceId),
            _ => None,
        }
    }

    /// Full topic for this feed under a broker username.
    pub fn topic_for(&self, broker_username: &str) -> String {
        format!("{}/feeds/{}", broker_username, self.as_str())
    }
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for feed in Feed::ALL {
            let topic = feed.topic_for("aio_user");
            assert_eq!(Feed::from_topic(&topic), Some(feed));
        }
    }

    #[test]
    fn test_unknown_suffix_not_routed() {
        assert_eq!(Feed::from_topic("aio_user/feeds/relay_home"), None);
        assert_eq!(Feed::from_topic("aio_user/feeds/temperature2"), None);
        assert_eq!(Feed::from_topic("aio_user/other/relay"), None);
        assert_eq!(Feed::from_topic("relay"), None);
    }

    #[test]
    fn test_topic_format() {
        assert_eq!(Feed::Relay.topic_for("bob"), "bob/feeds/relay");
    }
}
