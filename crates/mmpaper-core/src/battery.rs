//! LiPo charge estimate from the cell voltage.

/// Cell voltage treated as empty.
pub const EMPTY_MV: u16 = 3_000;
/// Cell voltage treated as full.
pub const FULL_MV: u16 = 4_200;

/// Linear charge estimate, clamped to 0..=100.
pub fn percent_from_millivolts(millivolts: u16) -> u8 {
    if millivolts <= EMPTY_MV {
        return 0;
    }
    if millivolts >= FULL_MV {
        return 100;
    }
    ((millivolts - EMPTY_MV) as u32 * 100 / (FULL_MV - EMPTY_MV) as u32) as u8
}
