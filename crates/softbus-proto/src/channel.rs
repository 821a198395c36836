//! Logical bus channels.

use std::fmt;

/// One of the three logical channels multiplexed over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelType {
    /// Commands and metadata
    #[default]
    Control,
    /// Single still captures
    Snapshot,
    /// Streaming video
    Continuous,
}

impl ChannelType {
    /// All channels, in the order sessions are usually opened.
    pub const ALL: [Self; 3] = [Self::Control, Self::Snapshot, Self::Continuous];

    /// Derive the channel from a session name.
    ///
    /// Case-insensitive substring match against "control", "snapshot" and
    /// "continuous", checked in that order. Names matching none default to
    /// [`ChannelType::Control`].
    pub fn from_session_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("control") {
            Self::Control
        } else if lower.contains("snapshot") {
            Self::Snapshot
        } else if lower.contains("continuous") {
            Self::Continuous
        } else {
            Self::Control
        }
    }

    /// Suffix appended to role prefixes to form session names
    /// (`DCameraSink` + `Control`).
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Control => "Control",
            Self::Snapshot => "Snapshot",
            Self::Continuous => "Continuous",
        }
    }

    /// Bus priority for data sent on this channel: control traffic first,
    /// then stills, then video.
    pub fn priority(self) -> u8 {
        match self {
            Self::Control => 2,
            Self::Snapshot => 1,
            Self::Continuous => 0,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
