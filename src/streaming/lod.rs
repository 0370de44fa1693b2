//! Level of Detail (LOD) arithmetic for the tile pyramid
//!
//! Every LOD doubles the edge length of a tile while keeping the sample
//! count, so the sample spacing doubles too. Distance bands double with it:
//!
//! - LOD 0: 1m spacing - `0..d0`
//! - LOD 1: 2m spacing - `d0..2*d0`
//! - LOD 2: 4m spacing - `2*d0..4*d0`
//! - ...
//! - max LOD: everything beyond

/// Default coarsest LOD; the pyramid is built recursively so keep this small
pub const DEFAULT_MAX_LOD: u32 = 4;

/// Distance between adjacent samples at `lod` in world units, `None` past `u32`
#[inline]
pub fn sample_spacing(lod: u32) -> Option<u32> {
    1u32.checked_shl(lod)
}

/// Calculate LOD level from distance
///
/// # Arguments
/// * `distance` - Distance from viewer to the tile center
/// * `lod0_distance` - Outer edge of the full-detail band
/// * `max_lod` - Coarsest LOD to return
///
/// # Examples
/// ```
/// use terrastream::streaming::lod::lod_from_distance;
///
/// assert_eq!(lod_from_distance(500.0, 1024.0, 4), 0);
/// assert_eq!(lod_from_distance(1500.0, 1024.0, 4), 1);
/// assert_eq!(lod_from_distance(3000.0, 1024.0, 4), 2);
/// assert_eq!(lod_from_distance(1.0e9, 1024.0, 4), 4);
/// ```
pub fn lod_from_distance(distance: f32, lod0_distance: f32, max_lod: u32) -> u32 {
    if distance < lod0_distance || lod0_distance <= 0.0 {
        return 0;
    }
    let level = (distance / lod0_distance).log2().floor() as u32 + 1;
    level.min(max_lod)
}

/// Distance band `[near, far)` served by `lod`
pub fn lod_band(lod: u32, lod0_distance: f32, max_lod: u32) -> (f32, f32) {
    let near = if lod == 0 {
        0.0
    } else {
        lod0_distance * 2f32.powi(lod as i32 - 1)
    };
    let far = if lod >= max_lod {
        f32::MAX
    } else {
        lod0_distance * 2f32.powi(lod as i32)
    };
    (near, far)
}
