//! Minimal NIfTI-1 / NIfTI-2 reader.
//!
//! Only the voxel array and its shape are decoded; orientation, units and
//! extensions are skipped. Gzip-compressed files are detected by their magic
//! bytes, not by the file name.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use prepdiff_core::PrepdiffError;

use crate::volume::Volume;

const NIFTI1_HEADER_SIZE: i32 = 348;
const NIFTI2_HEADER_SIZE: i32 = 540;
// Header plus the 4-byte extension flag; voxel data never starts earlier.
const NIFTI1_DATA_START: usize = 352;
const NIFTI2_DATA_START: usize = 544;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// On-disk sample type, keyed by the NIfTI `datatype` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    /// Map a `datatype` code to a supported sample type.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(DataType::U8),
            4 => Some(DataType::I16),
            8 => Some(DataType::I32),
            16 => Some(DataType::F32),
            64 => Some(DataType::F64),
            256 => Some(DataType::I8),
            512 => Some(DataType::U16),
            768 => Some(DataType::U32),
            1024 => Some(DataType::I64),
            1280 => Some(DataType::U64),
            _ => None,
        }
    }

    /// Size of one sample in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }
}

/// The header fields needed to locate and decode the voxel array.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub shape: Vec<usize>,
    pub datatype: DataType,
    pub vox_offset: usize,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub big_endian: bool,
}

/// Load a `.nii` or `.nii.gz` file as a floating-point volume.
///
/// Scaling is applied the way nibabel's `get_fdata` does: only when
/// `scl_slope` is finite and non-zero.
///
/// # Errors
///
/// Returns [`PrepdiffError::FileNotFound`] if `path` does not exist,
/// [`PrepdiffError::Io`] if it cannot be read or decompressed, and
/// [`PrepdiffError::Nifti`] if the content is not a supported NIfTI image.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use prepdiff_compare::nifti::load_volume;
///
/// let volume = load_volume(Path::new("sub-S01_desc-brain_mask.nii.gz")).unwrap();
/// println!("{:?}", volume.shape());
/// ```
pub fn load_volume(path: &Path) -> Result<Volume, PrepdiffError> {
    if !path.exists() {
        return Err(PrepdiffError::FileNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read(path)?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        raw
    };
    decode(&bytes).map_err(|reason| PrepdiffError::nifti(path, reason))
}

/// Decode an uncompressed NIfTI image held in memory.
pub fn decode(bytes: &[u8]) -> Result<Volume, String> {
    let header = parse_header(bytes)?;
    let count: usize = header.shape.iter().product();
    let width = header.datatype.size();
    let len = count
        .checked_mul(width)
        .ok_or_else(|| "voxel count overflows".to_string())?;
    let end = header
        .vox_offset
        .checked_add(len)
        .ok_or_else(|| "voxel data offset overflows".to_string())?;
    let Some(raw) = bytes.get(header.vox_offset..end) else {
        return Err(format!(
            "truncated voxel data: need {end} bytes, file has {}",
            bytes.len()
        ));
    };

    let mut samples: Vec<f64> = raw
        .chunks_exact(width)
        .map(|chunk| sample(chunk, header.datatype, header.big_endian))
        .collect();

    if header.scl_slope.is_finite() && header.scl_slope != 0.0 {
        let inter = if header.scl_inter.is_finite() {
            header.scl_inter
        } else {
            0.0
        };
        for v in &mut samples {
            *v = *v * header.scl_slope + inter;
        }
    }

    // NIfTI stores the first axis fastest.
    let data = ArrayD::from_shape_vec(IxDyn(&header.shape).f(), samples)
        .map_err(|e| format!("shape {:?} does not fit data: {e}", header.shape))?;
    Ok(Volume::new(data))
}

/// Parse a NIfTI-1 or NIfTI-2 header, detecting byte order from `sizeof_hdr`.
pub fn parse_header(bytes: &[u8]) -> Result<Header, String> {
    let le = Bytes {
        bytes,
        big_endian: false,
    };
    let be = Bytes {
        bytes,
        big_endian: true,
    };
    let sizeof_hdr = le.i32_at(0)?;
    let (cursor, sizeof_hdr) = if sizeof_hdr == NIFTI1_HEADER_SIZE || sizeof_hdr == NIFTI2_HEADER_SIZE
    {
        (le, sizeof_hdr)
    } else {
        let swapped = be.i32_at(0)?;
        if swapped != NIFTI1_HEADER_SIZE && swapped != NIFTI2_HEADER_SIZE {
            return Err(format!("bad sizeof_hdr {sizeof_hdr}"));
        }
        (be, swapped)
    };

    if sizeof_hdr == NIFTI1_HEADER_SIZE {
        parse_nifti1(&cursor)
    } else {
        parse_nifti2(&cursor)
    }
}

fn parse_nifti1(b: &Bytes<'_>) -> Result<Header, String> {
    let magic = b.slice(344, 4)?;
    if magic == b"ni1\0" {
        return Err("two-file (.hdr/.img) images are not supported".into());
    }
    if magic != b"n+1\0" {
        return Err("missing n+1 magic".into());
    }

    let mut dims = [0i64; 8];
    for (i, d) in dims.iter_mut().enumerate() {
        *d = i64::from(b.i16_at(40 + 2 * i)?);
    }
    let code = b.i16_at(70)?;
    let vox_offset = f64::from(b.f32_at(108)?);
    let scl_slope = f64::from(b.f32_at(112)?);
    let scl_inter = f64::from(b.f32_at(116)?);
    build_header(b, &dims, code, vox_offset, NIFTI1_DATA_START, scl_slope, scl_inter)
}

fn parse_nifti2(b: &Bytes<'_>) -> Result<Header, String> {
    let magic = b.slice(4, 4)?;
    if magic == b"ni2\0" {
        return Err("two-file (.hdr/.img) images are not supported".into());
    }
    if magic != b"n+2\0" {
        return Err("missing n+2 magic".into());
    }

    let code = b.i16_at(12)?;
    let mut dims = [0i64; 8];
    for (i, d) in dims.iter_mut().enumerate() {
        *d = b.i64_at(16 + 8 * i)?;
    }
    let vox_offset = b.i64_at(168)? as f64;
    let scl_slope = b.f64_at(176)?;
    let scl_inter = b.f64_at(184)?;
    build_header(b, &dims, code, vox_offset, NIFTI2_DATA_START, scl_slope, scl_inter)
}

fn build_header(
    b: &Bytes<'_>,
    dims: &[i64; 8],
    code: i16,
    vox_offset: f64,
    data_start: usize,
    scl_slope: f64,
    scl_inter: f64,
) -> Result<Header, String> {
    let ndim = dims[0];
    if !(1..=7).contains(&ndim) {
        return Err(format!("invalid dim[0] {ndim}"));
    }
    let shape = dims[1..=ndim as usize]
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| format!("negative dimension {d}")))
        .collect::<Result<Vec<_>, _>>()?;

    let datatype =
        DataType::from_code(code).ok_or_else(|| format!("unsupported datatype code {code}"))?;

    if !vox_offset.is_finite() || vox_offset < 0.0 {
        return Err(format!("invalid vox_offset {vox_offset}"));
    }
    // Single-file images with an offset inside the header are read from the
    // end of the header, as nibabel does.
    let vox_offset = (vox_offset as usize).max(data_start);

    Ok(Header {
        shape,
        datatype,
        vox_offset,
        scl_slope,
        scl_inter,
        big_endian: b.big_endian,
    })
}

fn sample(chunk: &[u8], datatype: DataType, big_endian: bool) -> f64 {
    macro_rules! read {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(chunk);
            if big_endian {
                <$t>::from_be_bytes(buf)
            } else {
                <$t>::from_le_bytes(buf)
            }
        }};
    }
    match datatype {
        DataType::U8 => f64::from(chunk[0]),
        DataType::I8 => f64::from(chunk[0] as i8),
        DataType::I16 => f64::from(read!(i16, 2)),
        DataType::U16 => f64::from(read!(u16, 2)),
        DataType::I32 => f64::from(read!(i32, 4)),
        DataType::U32 => f64::from(read!(u32, 4)),
        DataType::I64 => read!(i64, 8) as f64,
        DataType::U64 => read!(u64, 8) as f64,
        DataType::F32 => f64::from(read!(f32, 4)),
        DataType::F64 => read!(f64, 8),
    }
}

struct Bytes<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl<'a> Bytes<'a> {
    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], String> {
        self.bytes
            .get(offset..offset + len)
            .ok_or_else(|| format!("header truncated at byte {offset}"))
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], String> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.slice(offset, N)?);
        Ok(buf)
    }

    fn i16_at(&self, offset: usize) -> Result<i16, String> {
        let buf = self.array::<2>(offset)?;
        Ok(if self.big_endian {
            i16::from_be_bytes(buf)
        } else {
            i16::from_le_bytes(buf)
        })
    }

    fn i32_at(&self, offset: usize) -> Result<i32, String> {
        let buf = self.array::<4>(offset)?;
        Ok(if self.big_endian {
            i32::from_be_bytes(buf)
        } else {
            i32::from_le_bytes(buf)
        })
    }

    fn i64_at(&self, offset: usize) -> Result<i64, String> {
        let buf = self.array::<8>(offset)?;
        Ok(if self.big_endian {
            i64::from_be_bytes(buf)
        } else {
            i64::from_le_bytes(buf)
        })
    }

    fn f32_at(&self, offset: usize) -> Result<f32, String> {
        let buf = self.array::<4>(offset)?;
        Ok(if self.big_endian {
            f32::from_be_bytes(buf)
        } else {
            f32::from_le_bytes(buf)
        })
    }

    fn f64_at(&self, offset: usize) -> Result<f64, String> {
        let buf = self.array::<8>(offset)?;
        Ok(if self.big_endian {
            f64::from_be_bytes(buf)
        } else {
            f64::from_le_bytes(buf)
        })
    }
}
