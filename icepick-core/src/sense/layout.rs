use crate::channels::{ChannelMask, SenseChannel};
use crate::regs::RawSenseSample;

/// Attribution of a result buffer back to the channels that produced it.
///
/// Samples are stored round-robin over the selected channels in ascending
/// ordinal order, so sample `n` belongs to the `n % k`-th selected channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SenseLayout {
    mask: ChannelMask,
}

impl SenseLayout {
    #[must_use]
    pub const fn new(mask: ChannelMask) -> Self {
        Self { mask }
    }

    #[must_use]
    pub const fn mask(self) -> ChannelMask {
        self.mask
    }

    /// Channel that produced result `index`.
    #[must_use]
    pub fn channel_for(self, index: usize) -> Option<SenseChannel> {
        let width = self.width();
        if width == 0 {
            return None;
        }
        self.mask.iter().nth(index % width)
    }

    /// Per-channel views over `results`, in ascending channel order.
    pub fn group<'a>(
        self,
        results: &'a [RawSenseSample],
    ) -> impl Iterator<Item = ChannelSamples<'a>> + 'a {
        let stride = self.width();
        self.mask
            .iter()
            .enumerate()
            .map(move |(offset, channel)| ChannelSamples {
                channel,
                results,
                next: offset,
                stride,
            })
    }

    fn width(self) -> usize {
        self.mask.len() as usize
    }
}

/// Samples of one channel taken from a result buffer, oldest first.
#[derive(Clone, Debug)]
pub struct ChannelSamples<'a> {
    channel: SenseChannel,
    results: &'a [RawSenseSample],
    next: usize,
    stride: usize,
}

impl ChannelSamples<'_> {
    #[must_use]
    pub fn channel(&self) -> SenseChannel {
        self.channel
    }
}

impl Iterator for ChannelSamples<'_> {
    type Item = RawSenseSample;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = *self.results.get(self.next)?;
        self.next += self.stride;
        Some(sample)
    }
}
