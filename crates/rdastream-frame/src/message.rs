use std::fmt;

use bytes::Bytes;

use crate::header::MessageKind;

/// Session metadata sent once at the beginning of every RDA session.
#[derive(Debug, Clone, PartialEq)]
pub struct StartMessage {
    /// Sampling interval in microseconds.
    pub sampling_interval: f64,
    /// Resolution of each channel in microvolts per unit; one entry per channel.
    pub resolutions: Vec<f64>,
    /// Channel names in channel order. May be shorter than `resolutions`
    /// when the server sends fewer names than channels.
    pub channel_names: Vec<String>,
}

impl StartMessage {
    /// Number of channels announced by this session.
    pub fn channels(&self) -> usize {
        self.resolutions.len()
    }

    /// Name of channel `index`, when the server sent one.
    pub fn channel_name(&self, index: usize) -> Option<&str> {
        self.channel_names.get(index).map(String::as_str)
    }

    /// Sampling rate derived from the sampling interval.
    pub fn sampling_rate_hz(&self) -> Option<f64> {
        (self.sampling_interval > 0.0).then(|| 1_000_000.0 / self.sampling_interval)
    }

    /// Channel names joined into the wire representation (null-terminated each).
    pub(crate) fn names_region(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for name in &self.channel_names {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        out
    }

    /// Split a null-separated names region.
    pub(crate) fn parse_names(region: &[u8]) -> Vec<String> {
        if region.is_empty() {
            return Vec::new();
        }
        let trimmed = region.strip_suffix(&[0]).unwrap_or(region);
        trimmed
            .split(|b| *b == 0)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .collect()
    }
}

impl fmt::Display for StartMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} channels:", self.channels())?;
        for (idx, resolution) in self.resolutions.iter().enumerate() {
            let name = self.channel_name(idx).unwrap_or("?");
            writeln!(f, "{name}: {resolution} uV")?;
        }
        Ok(())
    }
}

/// One block of float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Server block counter; increases by one per block.
    pub block_number: u32,
    /// Sample points per channel in this block.
    pub points: u32,
    /// Channel count used to lay out `samples`.
    pub channels: usize,
    /// `points × channels` samples, point-major (all channels of point 0 first).
    pub samples: Vec<f32>,
    /// Raw markers region following the samples; may be empty.
    pub markers: Bytes,
}

impl DataMessage {
    /// Iterate the block as `(points, channels)` rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.chunks_exact(self.channels.max(1))
    }

    /// Size of the float region in bytes.
    pub fn float_region_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// A fully decoded frame, tagged by message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Start(StartMessage),
    Data(DataMessage),
    Stop,
    /// A frame whose body was discarded.
    Unknown { kind: MessageKind, len: usize },
}

impl Message {
    /// The header kind this message was decoded from.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Start(_) => MessageKind::Start,
            Message::Data(_) => MessageKind::Data,
            Message::Stop => MessageKind::Stop,
            Message::Unknown { kind, .. } => *kind,
        }
    }
}
