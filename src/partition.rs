//! Static row-band partitioning of a 2D output domain.
//!
//! The domain is split along the height axis only. Every band spans the
//! full width, so each band maps to one contiguous byte range of a
//! row-major image and the ranges of different bands never overlap.

use crate::error::{Error, Result};

/// What to do with `height % devices` leftover rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// The last band absorbs all leftover rows.
    #[default]
    LastBand,
    /// The first `height % devices` bands get one extra row each.
    Spread,
    /// Refuse domains that do not divide evenly.
    Reject,
}

/// One device's share of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Device index this band is assigned to.
    pub index: usize,
    /// `[x, y]` of the band's first work item.
    pub offset: [usize; 2],
    /// `[width, rows]` of the band.
    pub extent: [usize; 2],
    /// First byte of the band in the output buffer.
    pub byte_offset: usize,
    /// Bytes covered by the band.
    pub byte_len: usize,
}

impl Band {
    /// Rows in the band.
    pub fn rows(&self) -> usize {
        self.extent[1]
    }

    /// Bands with no rows are never submitted.
    pub fn is_empty(&self) -> bool {
        self.extent[0] == 0 || self.extent[1] == 0
    }

    /// First row past the band.
    pub fn end_row(&self) -> usize {
        self.offset[1] + self.extent[1]
    }

    /// Bytes of the output buffer this band writes.
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        self.byte_offset..self.byte_offset + self.byte_len
    }
}

fn rows_for(index: usize, height: usize, devices: usize, policy: RemainderPolicy) -> usize {
    let base = height / devices;
    let remainder = height % devices;
    match policy {
        RemainderPolicy::LastBand if index + 1 == devices => base + remainder,
        RemainderPolicy::Spread if index < remainder => base + 1,
        _ => base,
    }
}

/// Split `width x height` pixels of `bytes_per_pixel` bytes into `devices`
/// contiguous horizontal bands, in device order.
pub fn partition(
    width: usize,
    height: usize,
    devices: usize,
    bytes_per_pixel: usize,
    policy: RemainderPolicy,
) -> Result<Vec<Band>> {
    if devices == 0 {
        return Err(Error::config("cannot partition across zero devices"));
    }
    if width == 0 || height == 0 || bytes_per_pixel == 0 {
        return Err(Error::config(format!(
            "cannot partition an empty domain ({}x{}, {} bytes per pixel)",
            width, height, bytes_per_pixel
        )));
    }
    if policy == RemainderPolicy::Reject && height % devices != 0 {
        return Err(Error::config(format!(
            "height {} is not divisible by {} devices",
            height, devices
        )));
    }

    let row_bytes = width
        .checked_mul(bytes_per_pixel)
        .filter(|row| row.checked_mul(height).is_some())
        .ok_or_else(|| Error::config("domain size overflows usize"))?;

    let mut bands = Vec::with_capacity(devices);
    let mut y = 0;
    for index in 0..devices {
        let rows = rows_for(index, height, devices, policy);
        bands.push(Band {
            index,
            offset: [0, y],
            extent: [width, rows],
            byte_offset: y * row_bytes,
            byte_len: rows * row_bytes,
        });
        y += rows;
    }

    debug_assert_eq!(y, height);
    Ok(bands)
}
