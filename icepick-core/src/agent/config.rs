use crate::math::SenseCalibration;

/// Mapping between VIO millivolts and PDM codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VioScale {
    /// Output at PDM code `1 << pdm_bits`.
    pub full_scale_mv: u32,
    pub pdm_bits: u8,
}

impl VioScale {
    /// 12-bit PDM referenced to the 3.3 V rail.
    pub const REFERENCE: Self = Self {
        full_scale_mv: 3_300,
        pdm_bits: 12,
    };

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn max_pdm(self) -> u16 {
        ((1u32 << self.pdm_bits) - 1) as u16
    }

    /// PDM code for `millivolts`, clamped to the generator's range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn pdm_for_millivolts(self, millivolts: u32) -> u16 {
        let code = (u64::from(millivolts) << self.pdm_bits) / u64::from(self.full_scale_mv.max(1));
        code.min(u64::from(self.max_pdm())) as u16
    }

    /// Nominal output for a PDM code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn millivolts_for_pdm(self, pdm: u16) -> u32 {
        ((u64::from(pdm) * u64::from(self.full_scale_mv)) >> self.pdm_bits) as u32
    }
}

impl Default for VioScale {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Board-specific tuning supplied when the agent is built.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AgentConfig {
    pub sense: SenseCalibration,
    pub vio: VioScale,
}

impl AgentConfig {
    pub const REFERENCE: Self = Self {
        sense: SenseCalibration::REFERENCE,
        vio: VioScale::REFERENCE,
    };

    #[must_use]
    pub const fn with_sense(mut self, sense: SenseCalibration) -> Self {
        self.sense = sense;
        self
    }
}
