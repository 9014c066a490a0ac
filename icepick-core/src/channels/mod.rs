//! Sense multiplexer channels and channel sets.

use core::fmt;

/// Number of multiplexer inputs addressable by `sense.csr`.
pub const CHANNEL_COUNT: usize = 16;

/// Inputs of the sense multiplexer, in hardware ordinal order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SenseChannel {
    Gnd,
    B3,
    Vio,
    Vsense,
    A0,
    A1,
    A2,
    B2,
    V3v3,
    B0,
    B1,
    A3,
    A4,
    A5,
    V1v2,
    /// Reserved, nothing connected.
    Open,
}

/// Every channel, indexed by ordinal.
pub const ALL_CHANNELS: [SenseChannel; CHANNEL_COUNT] = [
    SenseChannel::Gnd,
    SenseChannel::B3,
    SenseChannel::Vio,
    SenseChannel::Vsense,
    SenseChannel::A0,
    SenseChannel::A1,
    SenseChannel::A2,
    SenseChannel::B2,
    SenseChannel::V3v3,
    SenseChannel::B0,
    SenseChannel::B1,
    SenseChannel::A3,
    SenseChannel::A4,
    SenseChannel::A5,
    SenseChannel::V1v2,
    SenseChannel::Open,
];

/// Sense channel wired to each I/O bank bit, `io.data` bit 0 first.
pub const IO_SENSE_CHANNELS: [SenseChannel; 10] = [
    SenseChannel::A0,
    SenseChannel::A1,
    SenseChannel::A2,
    SenseChannel::A3,
    SenseChannel::A4,
    SenseChannel::A5,
    SenseChannel::B0,
    SenseChannel::B1,
    SenseChannel::B2,
    SenseChannel::B3,
];

impl SenseChannel {
    /// Hardware ordinal written into `sense.csr`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_index(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < CHANNEL_COUNT {
            Some(ALL_CHANNELS[index as usize])
        } else {
            None
        }
    }

    /// Short label used by host tooling.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SenseChannel::Gnd => "gnd",
            SenseChannel::B3 => "b3",
            SenseChannel::Vio => "vio",
            SenseChannel::Vsense => "vsense",
            SenseChannel::A0 => "a0",
            SenseChannel::A1 => "a1",
            SenseChannel::A2 => "a2",
            SenseChannel::B2 => "b2",
            SenseChannel::V3v3 => "3v3",
            SenseChannel::B0 => "b0",
            SenseChannel::B1 => "b1",
            SenseChannel::A3 => "a3",
            SenseChannel::A4 => "a4",
            SenseChannel::A5 => "a5",
            SenseChannel::V1v2 => "1v2",
            SenseChannel::Open => "open",
        }
    }

    /// Case-insensitive lookup by [`label`](Self::label).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        ALL_CHANNELS
            .iter()
            .copied()
            .find(|channel| channel.label().eq_ignore_ascii_case(label))
    }

    /// The I/O bank bit driving this channel, for the ten generic pins.
    #[must_use]
    pub fn io_bit(self) -> Option<u8> {
        IO_SENSE_CHANNELS
            .iter()
            .position(|channel| *channel == self)
            .and_then(|bit| u8::try_from(bit).ok())
    }
}

impl fmt::Display for SenseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of sense channels, bit `n` selecting ordinal `n`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ChannelMask(u16);

impl ChannelMask {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub const fn contains(self, channel: SenseChannel) -> bool {
        self.0 & (1 << channel.as_index()) != 0
    }

    #[must_use]
    pub const fn with(self, channel: SenseChannel) -> Self {
        Self(self.0 | (1 << channel.as_index()))
    }

    /// Lowest selected channel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn first(self) -> Option<SenseChannel> {
        if self.0 == 0 {
            None
        } else {
            SenseChannel::from_index(self.0.trailing_zeros() as u8)
        }
    }

    /// Next selected channel strictly after `current`, wrapping past the top.
    ///
    /// With a single channel selected this returns that channel again.
    #[must_use]
    pub fn next_after(self, current: SenseChannel) -> Option<SenseChannel> {
        let mut index = current.as_index();
        for _ in 0..CHANNEL_COUNT {
            index = (index + 1) & 0x0F;
            let channel = SenseChannel::from_index(index)?;
            if self.contains(channel) {
                return Some(channel);
            }
        }
        None
    }

    /// Selected channels in ascending ordinal order.
    pub fn iter(self) -> impl Iterator<Item = SenseChannel> {
        ALL_CHANNELS
            .into_iter()
            .filter(move |channel| self.contains(*channel))
    }
}

impl FromIterator<SenseChannel> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = SenseChannel>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, ChannelMask::with)
    }
}
