//! Data Channel Selection
//!
//! Only channel selection algorithm #1 is supported. The next channel is found by adding the hop
//! increment to the last unmapped channel. If the resulting channel is not within the channel map
//! it is remapped to one of the used channels.

/// The number of data channels
pub const DATA_CHANNEL_COUNT: u8 = 37;

/// A map of the used data channels
///
/// This is the five octet bit field of the `ChM` field of a `CONNECT_IND` or an
/// `LL_CHANNEL_MAP_IND`. Bit `n` is set if data channel `n` is used.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelMap {
    raw: [u8; 5],
}

impl ChannelMap {
    /// Create a `ChannelMap` from its over the air representation
    ///
    /// The three most significant bits are reserved and cleared.
    pub fn new(mut raw: [u8; 5]) -> Self {
        raw[4] &= 0x1F;

        ChannelMap { raw }
    }

    /// Create a `ChannelMap` with every data channel used
    pub fn all() -> Self {
        ChannelMap::new([0xFF; 5])
    }

    /// Create a `ChannelMap` from a list of channels
    ///
    /// Channels larger than 36 are ignored.
    pub fn from_channels<I>(channels: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        let mut raw = [0u8; 5];

        channels
            .into_iter()
            .filter(|channel| *channel < DATA_CHANNEL_COUNT)
            .for_each(|channel| raw[channel as usize / 8] |= 1 << (channel % 8));

        ChannelMap { raw }
    }

    /// Get the over the air representation
    pub fn to_raw(&self) -> [u8; 5] {
        self.raw
    }

    /// Check if `channel` is used
    pub fn is_used(&self, channel: u8) -> bool {
        channel < DATA_CHANNEL_COUNT && self.raw[channel as usize / 8] & (1 << (channel % 8)) != 0
    }

    /// Get the number of used channels
    pub fn count(&self) -> u8 {
        self.raw.iter().map(|byte| byte.count_ones() as u8).sum()
    }

    /// Get the `n`th used channel, counting from zero
    pub fn nth_used(&self, n: u8) -> Option<u8> {
        self.used().nth(n as usize)
    }

    /// Iterate over the used channels in ascending order
    pub fn used(&self) -> impl Iterator<Item = u8> + '_ {
        (0..DATA_CHANNEL_COUNT).filter(move |channel| self.is_used(*channel))
    }
}

impl core::fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.used()).finish()
    }
}

/// Channel selection algorithm #1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSelector {
    unmapped: u8,
    hop: u8,
}

impl ChannelSelector {
    /// Create a new `ChannelSelector`
    ///
    /// The last unmapped channel starts at zero.
    pub fn new(hop: u8) -> Self {
        ChannelSelector { unmapped: 0, hop }
    }

    /// Get the last unmapped channel
    pub fn unmapped(&self) -> u8 {
        self.unmapped
    }

    /// Get the hop increment
    pub fn hop(&self) -> u8 {
        self.hop
    }

    /// Advance to the channel of the next connection event
    ///
    /// The returned channel is always within `map` unless `map` has no used channels.
    pub fn next(&mut self, map: &ChannelMap) -> u8 {
        self.unmapped = (self.unmapped + self.hop) % DATA_CHANNEL_COUNT;

        remap(self.unmapped, map)
    }
}

/// Map the unmapped channel to a used channel
pub fn remap(unmapped: u8, map: &ChannelMap) -> u8 {
    if map.is_used(unmapped) {
        return unmapped;
    }

    match map.count() {
        0 => unmapped,
        count => map.nth_used(unmapped % count).unwrap_or(unmapped),
    }
}
