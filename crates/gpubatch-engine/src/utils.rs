use ash::vk;

/// Three-component extent/offset used for work-group sizes and copy regions.
pub type UVec3 = [u32; 3];

/// Integer division rounding up. A zero numerator yields zero groups.
#[inline]
pub const fn div_up(numerator: u32, denominator: u32) -> u32 {
    if numerator == 0 {
        0
    } else {
        (numerator - 1) / denominator + 1
    }
}

/// Number of work groups to dispatch when every invocation group produces a
/// `tile`-sized block of outputs: `ceil(extent / tile)` per axis.
pub fn effective_work_groups(extent: UVec3, tile: UVec3) -> UVec3 {
    [
        div_up(extent[0], tile[0]),
        div_up(extent[1], tile[1]),
        div_up(extent[2], tile[2]),
    ]
}

pub fn extent3d(v: UVec3) -> vk::Extent3D {
    vk::Extent3D {
        width: v[0],
        height: v[1],
        depth: v[2],
    }
}

pub fn offset3d(v: UVec3) -> vk::Offset3D {
    vk::Offset3D {
        x: v[0] as i32,
        y: v[1] as i32,
        z: v[2] as i32,
    }
}
