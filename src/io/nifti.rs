//! Minimal NIfTI-1 single-file (`.nii` / `.nii.gz`) reader/writer.
//!
//! Reading accepts either byte order and the common scalar datatypes; gzip
//! input is detected from its magic bytes. Writing always produces
//! little-endian float32 with the sform taken from `Image::affine`, gzipped
//! when the path ends in `.gz`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::data::image::Image;
use crate::error::AppError;

const HEADER_SIZE: i32 = 348;
const VOX_OFFSET: usize = 352;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;

/// Whether `path` names a NIfTI image (`.nii` or `.nii.gz`).
pub fn is_nifti_path(path: &Path) -> bool {
    nifti_stem(path).is_some()
}

/// File name without the `.nii` / `.nii.gz` suffix.
pub fn nifti_stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .filter(|stem| !stem.is_empty())
}

/// Read a `.nii` or `.nii.gz` file into an `Image`.
pub fn read_nifti(path: &Path) -> Result<Image, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open NIfTI '{}': {e}", path.display())))?;
    let mut raw = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut raw)
        .map_err(|e| AppError::config(format!("Failed to read NIfTI '{}': {e}", path.display())))?;

    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| AppError::config(format!("Failed to decompress NIfTI '{}': {e}", path.display())))?;
        inflated
    } else {
        raw
    };

    let result = if bytes.len() >= 4 && LittleEndian::read_i32(&bytes[..4]) == HEADER_SIZE {
        decode::<LittleEndian>(&bytes)
    } else {
        decode::<BigEndian>(&bytes)
    };
    result.map_err(|e| AppError::config(format!("Invalid NIfTI '{}': {e}", path.display())))
}

fn decode<B: ByteOrder>(bytes: &[u8]) -> Result<Image, String> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err("file is shorter than a NIfTI-1 header".to_string());
    }
    let hdr = &bytes[..HEADER_SIZE as usize];
    if B::read_i32(&hdr[0..4]) != HEADER_SIZE {
        return Err("bad sizeof_hdr".to_string());
    }
    if &hdr[344..347] != b"n+1" {
        return Err("not a single-file NIfTI-1 image (magic 'n+1')".to_string());
    }

    let mut dim = [0i16; 8];
    for (i, d) in dim.iter_mut().enumerate() {
        *d = B::read_i16(&hdr[40 + 2 * i..42 + 2 * i]);
    }
    let ndim = dim[0];
    if !(1..=7).contains(&ndim) {
        return Err(format!("unsupported dim[0]={ndim}"));
    }
    if dim[5..=(ndim as usize).max(4)].iter().any(|&d| d > 1) {
        return Err("images with more than 4 dimensions are not supported".to_string());
    }
    let extent = |i: usize| -> usize {
        if i <= ndim as usize && dim[i] > 0 { dim[i] as usize } else { 1 }
    };
    let dims = [extent(1), extent(2), extent(3)];
    let nvols = extent(4);

    let datatype = B::read_i16(&hdr[70..72]);
    let mut pixdim = [0f32; 8];
    for (i, p) in pixdim.iter_mut().enumerate() {
        *p = B::read_f32(&hdr[76 + 4 * i..80 + 4 * i]);
    }
    let vox_offset = B::read_f32(&hdr[108..112]).max(HEADER_SIZE as f32) as usize;
    let slope = B::read_f32(&hdr[112..116]);
    let inter = B::read_f32(&hdr[116..120]);
    let sform_code = B::read_i16(&hdr[254..256]);

    let mut affine = [[0f32; 4]; 3];
    for (row, a) in affine.iter_mut().enumerate() {
        for (col, v) in a.iter_mut().enumerate() {
            let at = 280 + row * 16 + col * 4;
            *v = B::read_f32(&hdr[at..at + 4]);
        }
    }
    if sform_code <= 0 {
        affine = [
            [pixdim[1], 0.0, 0.0, 0.0],
            [0.0, pixdim[2], 0.0, 0.0],
            [0.0, 0.0, pixdim[3], 0.0],
        ];
    }

    let count = dims.iter().product::<usize>() * nvols;
    let width = match datatype {
        DT_UINT8 => 1,
        DT_INT16 => 2,
        DT_INT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => return Err(format!("unsupported datatype {other}")),
    };
    let end = vox_offset + count * width;
    if bytes.len() < end {
        return Err(format!(
            "expected {} bytes of voxel data, found {}",
            count * width,
            bytes.len().saturating_sub(vox_offset)
        ));
    }

    let mut rdr = Cursor::new(&bytes[vox_offset..end]);
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = match datatype {
            DT_UINT8 => rdr.read_u8().map(f32::from),
            DT_INT16 => rdr.read_i16::<B>().map(f32::from),
            DT_INT32 => rdr.read_i32::<B>().map(|v| v as f32),
            DT_FLOAT32 => rdr.read_f32::<B>(),
            _ => rdr.read_f64::<B>().map(|v| v as f32),
        }
        .map_err(|e| e.to_string())?;
        data.push(raw);
    }
    if slope != 0.0 && !(slope == 1.0 && inter == 0.0) {
        for v in &mut data {
            *v = *v * slope + inter;
        }
    }

    let mut image = Image::new(dims, nvols, data).map_err(|e| e.message().to_string())?;
    image.voxel_size = [pixdim[1].abs(), pixdim[2].abs(), pixdim[3].abs()];
    image.affine = affine;
    Ok(image)
}

/// Write an `Image` as little-endian float32 `.nii` (gzipped for `.gz` paths).
pub fn write_nifti(path: &Path, image: &Image) -> Result<(), AppError> {
    let dim = header_dims(image)?;
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create NIfTI '{}': {e}", path.display())))?;
    let out = BufWriter::new(file);
    let written = if path.extension().is_some_and(|ext| ext == "gz") {
        let mut gz = GzEncoder::new(out, Compression::default());
        encode(&mut gz, image, dim)
            .and_then(|_| gz.finish())
            .and_then(|mut inner| inner.flush())
    } else {
        let mut out = out;
        encode(&mut out, image, dim).and_then(|_| out.flush())
    };
    written.map_err(|e| AppError::config(format!("Failed to write NIfTI '{}': {e}", path.display())))?;
    tracing::debug!(path = %path.display(), shape = %image.shape_label(), "wrote NIfTI");
    Ok(())
}

/// NIfTI-1 stores dimensions as `i16`.
fn header_dims(image: &Image) -> Result<[i16; 8], AppError> {
    let to_i16 = |n: usize| {
        i16::try_from(n).map_err(|_| {
            AppError::data(format!(
                "Image {} does not fit a NIfTI-1 header (max {} per dimension)",
                image.shape_label(),
                i16::MAX
            ))
        })
    };
    let ndim: i16 = if image.nvols > 1 { 4 } else { 3 };
    Ok([
        ndim,
        to_i16(image.dims[0])?,
        to_i16(image.dims[1])?,
        to_i16(image.dims[2])?,
        to_i16(image.nvols)?,
        1,
        1,
        1,
    ])
}

fn encode<W: Write>(out: &mut W, image: &Image, dim: [i16; 8]) -> std::io::Result<()> {
    let mut hdr = vec![0u8; VOX_OFFSET];
    LittleEndian::write_i32(&mut hdr[0..4], HEADER_SIZE);
    hdr[38] = b'r';

    for (i, d) in dim.iter().enumerate() {
        LittleEndian::write_i16(&mut hdr[40 + 2 * i..42 + 2 * i], *d);
    }
    LittleEndian::write_i16(&mut hdr[70..72], DT_FLOAT32);
    LittleEndian::write_i16(&mut hdr[72..74], 32);

    let pixdim = [
        1.0,
        image.voxel_size[0],
        image.voxel_size[1],
        image.voxel_size[2],
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    for (i, p) in pixdim.iter().enumerate() {
        LittleEndian::write_f32(&mut hdr[76 + 4 * i..80 + 4 * i], *p);
    }
    LittleEndian::write_f32(&mut hdr[108..112], VOX_OFFSET as f32);
    LittleEndian::write_f32(&mut hdr[112..116], 1.0);
    // mm + s
    hdr[123] = 2 | 8;
    LittleEndian::write_i16(&mut hdr[254..256], 1);
    for (row, a) in image.affine.iter().enumerate() {
        for (col, v) in a.iter().enumerate() {
            let at = 280 + row * 16 + col * 4;
            LittleEndian::write_f32(&mut hdr[at..at + 4], *v);
        }
    }
    hdr[344..348].copy_from_slice(b"n+1\0");

    out.write_all(&hdr)?;
    for v in &image.data {
        out.write_f32::<LittleEndian>(*v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_preserves_geometry_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.nii");

        let data: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let mut img = Image::new([2, 3, 2], 2, data).unwrap();
        img.voxel_size = [3.0, 3.0, 5.0];
        img.affine = [
            [3.0, 0.0, 0.0, -10.0],
            [0.0, 3.0, 0.0, 20.0],
            [0.0, 0.0, 5.0, -30.0],
        ];

        write_nifti(&path, &img).unwrap();
        let back = read_nifti(&path).unwrap();
        assert_eq!(back, img);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (352 + 24 * 4) as u64);
    }

    #[test]
    fn reads_big_endian_int16_with_scaling() {
        let mut bytes = vec![0u8; 352];
        BigEndian::write_i32(&mut bytes[0..4], 348);
        for (i, d) in [3i16, 2, 1, 1, 1, 1, 1, 1].iter().enumerate() {
            BigEndian::write_i16(&mut bytes[40 + 2 * i..42 + 2 * i], *d);
        }
        BigEndian::write_i16(&mut bytes[70..72], DT_INT16);
        BigEndian::write_i16(&mut bytes[72..74], 16);
        BigEndian::write_f32(&mut bytes[80..84], 2.0);
        BigEndian::write_f32(&mut bytes[108..112], 352.0);
        BigEndian::write_f32(&mut bytes[112..116], 2.0);
        BigEndian::write_f32(&mut bytes[116..120], 1.0);
        bytes[344..348].copy_from_slice(b"n+1\0");
        bytes.extend_from_slice(&[0x00, 0x03, 0xff, 0xfe]);

        let img = decode::<BigEndian>(&bytes).unwrap();
        assert_eq!(img.dims, [2, 1, 1]);
        assert_eq!(img.nvols, 1);
        assert_eq!(img.data, vec![7.0, -3.0]);
        assert_eq!(img.voxel_size[0], 2.0);
    }

    #[test]
    fn rejects_truncated_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.nii");
        let img = Image::new([2, 2, 2], 1, vec![1.0; 8]).unwrap();
        write_nifti(&path, &img).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = read_nifti(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("voxel data"));
    }

    #[test]
    fn gzipped_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asl.nii.gz");
        let img = Image::new([2, 1, 1], 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        write_nifti(&path, &img).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
        assert_eq!(read_nifti(&path).unwrap(), img);
    }

    #[test]
    fn nifti_stem_strips_either_suffix() {
        assert_eq!(nifti_stem(Path::new("/out/mean_ftiss.nii.gz")), Some("mean_ftiss"));
        assert_eq!(nifti_stem(Path::new("finalMVN.nii")), Some("finalMVN"));
        assert_eq!(nifti_stem(Path::new("logfile")), None);
        assert!(!is_nifti_path(Path::new(".nii")));
    }

    #[test]
    fn oversized_dimension_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.nii");
        let img = Image::new([40_000, 1, 1], 1, vec![0.0; 40_000]).unwrap();

        let err = write_nifti(&path, &img).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(!path.exists());
    }
}
