use crate::types::{ArdError, ArdResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata};
use ndarray::{s, Array2, ArrayView2, Axis};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Width of the image border searched for GRD border noise
const BORDER_WINDOW: usize = 3000;
/// Columns removed after the first valid column of the border
const BORDER_MARGIN: usize = 150;
/// Mean value below which a border column is treated as noise
const BORDER_THRESHOLD: f32 = 100.0;

/// Output sample type of time-series layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Float32,
    UInt8,
    UInt16,
}

impl OutputType {
    /// Upper bound of the stretched integer range
    pub fn display_max(&self) -> f32 {
        match self {
            OutputType::UInt8 => 255.0,
            _ => 65535.0,
        }
    }
}

impl FromStr for OutputType {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(OutputType::Float32),
            "uint8" => Ok(OutputType::UInt8),
            "uint16" => Ok(OutputType::UInt16),
            other => Err(ArdError::InvalidParameters(format!(
                "Unknown datatype {}; choose from float32, uint8, uint16",
                other
            ))),
        }
    }
}

/// Single band together with its georeferencing
#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub data: Array2<f32>,
    pub geo_transform: [f64; 6],
    pub projection: String,
    pub nodata: Option<f64>,
}

/// Read one band of a raster into an array
pub fn read_band<P: AsRef<Path>>(path: P, band: isize) -> ArdResult<RasterLayer> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(band)?;
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| ArdError::Processing(format!("Failed to reshape band data: {}", e)))?;

    Ok(RasterLayer {
        data,
        geo_transform: dataset.geo_transform()?,
        projection: dataset.projection(),
        nodata: rasterband.no_data_value(),
    })
}

/// Number of bands of a raster
pub fn band_count<P: AsRef<Path>>(path: P) -> ArdResult<usize> {
    Ok(Dataset::open(path.as_ref())?.raster_count() as usize)
}

/// Read every band of a raster
pub fn read_bands<P: AsRef<Path>>(path: P) -> ArdResult<Vec<RasterLayer>> {
    let count = band_count(&path)?;
    (1..=count).map(|band| read_band(&path, band as isize)).collect()
}

/// Sample `layer` onto the north-up grid given by `geo_transform` and
/// `shape` (rows, columns) by nearest neighbour. Cells outside the layer are 0.
pub fn resample_nearest(layer: &RasterLayer, geo_transform: &[f64; 6], shape: (usize, usize)) -> Array2<f32> {
    if layer.geo_transform == *geo_transform && layer.data.dim() == shape {
        return layer.data.clone();
    }
    let src = &layer.geo_transform;
    let (src_rows, src_cols) = layer.data.dim();
    Array2::from_shape_fn(shape, |(row, col)| {
        let x = geo_transform[0] + (col as f64 + 0.5) * geo_transform[1];
        let y = geo_transform[3] + (row as f64 + 0.5) * geo_transform[5];
        let c = ((x - src[0]) / src[1]).floor();
        let r = ((y - src[3]) / src[5]).floor();
        if c < 0.0 || r < 0.0 || c >= src_cols as f64 || r >= src_rows as f64 {
            0.0
        } else {
            layer.data[[r as usize, c as usize]]
        }
    })
}

/// Write bands of equal shape to a GeoTIFF
pub fn write_geotiff<P: AsRef<Path>>(
    path: P,
    bands: &[Array2<f32>],
    descriptions: &[String],
    geo_transform: &[f64; 6],
    projection: &str,
    dtype: OutputType,
    nodata: Option<f64>,
) -> ArdResult<()> {
    match dtype {
        OutputType::Float32 => write_bands::<f32, _>(path, bands, descriptions, geo_transform, projection, nodata, |v| v),
        OutputType::UInt8 => write_bands::<u8, _>(path, bands, descriptions, geo_transform, projection, nodata, |v| {
            v.round().clamp(0.0, 255.0) as u8
        }),
        OutputType::UInt16 => write_bands::<u16, _>(path, bands, descriptions, geo_transform, projection, nodata, |v| {
            v.round().clamp(0.0, 65535.0) as u16
        }),
    }
}

fn write_bands<T: GdalType + Copy, P: AsRef<Path>>(
    path: P,
    bands: &[Array2<f32>],
    descriptions: &[String],
    geo_transform: &[f64; 6],
    projection: &str,
    nodata: Option<f64>,
    convert: impl Fn(f32) -> T,
) -> ArdResult<()> {
    let first = bands
        .first()
        .ok_or_else(|| ArdError::Processing("No bands to write".to_string()))?;
    let (height, width) = first.dim();

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<T, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        bands.len() as isize,
    )?;
    dataset.set_geo_transform(geo_transform)?;
    if !projection.is_empty() {
        dataset.set_projection(projection)?;
    }

    for (i, band) in bands.iter().enumerate() {
        if band.dim() != (height, width) {
            return Err(ArdError::Processing(format!(
                "Band {} has shape {:?}, expected {:?}",
                i + 1,
                band.dim(),
                (height, width)
            )));
        }
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        // NaN is written as 0, the nodata value of every output type
        let flat: Vec<T> = band
            .iter()
            .map(|&v| convert(if v.is_nan() { 0.0 } else { v }))
            .collect();
        let buffer = Buffer::new((width, height), flat);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(nodata)?;
        if let Some(description) = descriptions.get(i) {
            rasterband.set_description(description)?;
        }
    }

    log::debug!("Wrote {} band(s) to {}", bands.len(), path.as_ref().display());
    Ok(())
}

/// Convert power values to dB in place
pub fn convert_to_db(array: &mut Array2<f32>) {
    array.mapv_inplace(|v| {
        if v.is_nan() {
            return v;
        }
        let v = if v < 0.0 { 0.0000001 } else { v };
        10.0 * v.max(1e-13).log10()
    });
}

/// Convert dB values back to power in place
pub fn convert_to_power(array: &mut Array2<f32>) {
    array.mapv_inplace(|v| if v.is_nan() { v } else { 10f32.powf(v / 10.0) });
}

/// Stretch values between `min_value` and `max_value` to the integer range of `dtype`.
///
/// The stretched values stay in an f32 array; the GeoTIFF writer casts them.
pub fn scale_to_int(array: &Array2<f32>, min_value: f32, max_value: f32, dtype: OutputType) -> Array2<f32> {
    let display_min = 1.0;
    let display_max = dtype.display_max();

    let a = min_value - ((max_value - min_value) / (display_max - display_min));
    let x = (max_value - min_value) / (display_max - 1.0);

    array.mapv(|v| {
        if v.is_nan() {
            return 0.0;
        }
        let clipped = v.clamp(min_value, max_value);
        ((clipped - a) / x).round()
    })
}

/// Inverse of [`scale_to_int`] for backscatter in dB (-30 to 5)
pub fn rescale_to_float(array: &Array2<f32>, dtype: OutputType) -> ArdResult<Array2<f32>> {
    let a = match dtype {
        OutputType::UInt8 => 35.0 / 254.0,
        OutputType::UInt16 => 35.0 / 65535.0,
        OutputType::Float32 => {
            return Err(ArdError::InvalidParameters("Unknown datatype for rescaling".to_string()))
        }
    };
    let b = -30.0 - a;
    Ok(array.mapv(|v| if v == 0.0 { f32::NAN } else { v * a + b }))
}

/// Number of border columns to zero, counted from the side given by `reverse`
pub fn border_noise_columns(window: ArrayView2<f32>, reverse: bool) -> usize {
    let n = window.len_of(Axis(1));
    let columns: Box<dyn Iterator<Item = usize>> = if reverse {
        Box::new((0..n).rev())
    } else {
        Box::new(0..n)
    };

    for (k, col) in columns.enumerate() {
        let mean = window.column(col).mean().unwrap_or(0.0);
        if mean > BORDER_THRESHOLD {
            return (k + BORDER_MARGIN).min(n);
        }
    }
    n
}

/// Remove GRD border noise from a raster in place
pub fn remove_border_noise<P: AsRef<Path>>(path: P) -> ArdResult<()> {
    let path = path.as_ref();
    log::debug!("Removing border noise from {}", path.display());

    let dataset = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE,
            ..Default::default()
        },
    )?;
    let (width, height) = dataset.raster_size();
    let window = BORDER_WINDOW.min(width);
    let mut rasterband = dataset.rasterband(1)?;

    for (offset, reverse) in [(0usize, false), (width - window, true)] {
        let buffer = rasterband.read_as::<f32>((offset as isize, 0), (window, height), (window, height), None)?;
        let mut block = Array2::from_shape_vec((height, window), buffer.data)
            .map_err(|e| ArdError::Processing(format!("Failed to reshape border block: {}", e)))?;

        let cut = border_noise_columns(block.view(), reverse);
        if reverse {
            block.slice_mut(s![.., window - cut..]).fill(0.0);
        } else {
            block.slice_mut(s![.., ..cut]).fill(0.0);
        }
        log::debug!("Zeroed {} border columns ({})", cut, if reverse { "far range" } else { "near range" });

        let flat: Vec<f32> = block.iter().copied().collect();
        rasterband.write((offset as isize, 0), (window, height), &Buffer::new((window, height), flat))?;
    }
    Ok(())
}

/// Band images of a BEAM-DIMAP product, sorted by name
pub fn dimap_images<P: AsRef<Path>>(dimap: P) -> ArdResult<Vec<PathBuf>> {
    let data_dir = dimap.as_ref().with_extension("data");
    let mut images: Vec<PathBuf> = std::fs::read_dir(&data_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "img"))
        .collect();
    images.sort();
    Ok(images)
}

/// Stack the backscatter bands of a BEAM-DIMAP product into a GeoTIFF.
///
/// Dual-polarised products get a third band holding the co/cross-pol
/// ratio (difference in dB).
pub fn dimap_to_tif<P: AsRef<Path>, Q: AsRef<Path>>(dimap: P, outfile: Q, to_db: bool) -> ArdResult<()> {
    let images: Vec<PathBuf> = dimap_images(&dimap)?
        .into_iter()
        .filter(|p| {
            let name = p.to_string_lossy().to_lowercase();
            !name.contains("layover") && !name.contains("shadow")
        })
        .collect();

    if images.is_empty() {
        return Err(ArdError::Processing(format!(
            "No band images found for {}",
            dimap.as_ref().display()
        )));
    }

    // co-polarised band first
    let mut ordered = images.clone();
    ordered.sort_by_key(|p| {
        let name = p.to_string_lossy().to_uppercase();
        if name.contains("VV") || name.contains("HH") { 0 } else { 1 }
    });

    let mut layers = Vec::new();
    let mut descriptions = Vec::new();
    for image in ordered.iter().take(2) {
        let mut layer = read_band(image, 1)?;
        if to_db {
            convert_to_db(&mut layer.data);
        }
        descriptions.push(
            image
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        layers.push(layer);
    }

    let mut bands: Vec<Array2<f32>> = layers.iter().map(|l| l.data.clone()).collect();
    if bands.len() == 2 {
        let ratio = if to_db {
            &bands[0] - &bands[1]
        } else {
            let mut co = bands[0].clone();
            let mut cross = bands[1].clone();
            convert_to_db(&mut co);
            convert_to_db(&mut cross);
            co - cross
        };
        bands.push(ratio);
        descriptions.push("ratio".to_string());
    }

    write_geotiff(
        outfile,
        &bands,
        &descriptions,
        &layers[0].geo_transform,
        &layers[0].projection,
        OutputType::Float32,
        Some(0.0),
    )
}

/// Virtual raster of the given files, one band per file
pub fn build_vrt<P: AsRef<Path>>(outfile: P, files: &[PathBuf]) -> ArdResult<()> {
    let datasets = files
        .iter()
        .map(Dataset::open)
        .collect::<Result<Vec<_>, _>>()?;
    let options = gdal::programs::raster::BuildVRTOptions::new(vec!["-separate", "-srcnodata", "0"])?;
    gdal::programs::raster::build_vrt(Some(outfile.as_ref()), datasets.as_slice(), Some(options))?;
    log::debug!("Created {} from {} layers", outfile.as_ref().display(), files.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_convert_to_db() {
        let mut a = array![[1.0f32, 0.1], [-1.0, 100.0]];
        convert_to_db(&mut a);
        assert_relative_eq!(a[[0, 0]], 0.0);
        assert_relative_eq!(a[[0, 1]], -10.0, epsilon = 1e-5);
        assert_relative_eq!(a[[1, 0]], -70.0, epsilon = 1e-3);
        assert_relative_eq!(a[[1, 1]], 20.0, epsilon = 1e-5);
    }

    #[test]
    fn test_scale_to_int_clips_to_range() {
        let a = array![[-40.0f32, -30.0], [5.0, 10.0]];
        let scaled = scale_to_int(&a, -30.0, 5.0, OutputType::UInt8);
        assert_relative_eq!(scaled[[0, 0]], scaled[[0, 1]]);
        assert_relative_eq!(scaled[[1, 0]], 255.0);
        assert_relative_eq!(scaled[[1, 1]], 255.0);
        assert!(scaled[[0, 1]] >= 1.0);
    }

    #[test]
    fn test_rescale_to_float_marks_zero_as_nodata() {
        let a = array![[0.0f32, 255.0]];
        let back = rescale_to_float(&a, OutputType::UInt8).unwrap();
        assert!(back[[0, 0]].is_nan());
        assert_relative_eq!(back[[0, 1]], 5.0, epsilon = 0.2);
        assert!(rescale_to_float(&a, OutputType::Float32).is_err());
    }

    #[test]
    fn test_border_noise_columns() {
        let mut block = Array2::<f32>::from_elem((4, 400), 500.0);
        block.slice_mut(s![.., ..10]).fill(20.0);
        block.slice_mut(s![.., 395..]).fill(0.0);

        assert_eq!(border_noise_columns(block.view(), false), 160);
        assert_eq!(border_noise_columns(block.view(), true), 155);

        let empty = Array2::<f32>::zeros((4, 100));
        assert_eq!(border_noise_columns(empty.view(), false), 100);
    }

    #[test]
    fn test_resample_nearest_onto_shifted_grid() {
        let layer = RasterLayer {
            data: array![[1.0f32, 2.0], [3.0, 4.0]],
            geo_transform: [10.0, 1.0, 0.0, 50.0, 0.0, -1.0],
            projection: String::new(),
            nodata: None,
        };
        // same grid is returned as is
        assert_eq!(resample_nearest(&layer, &layer.geo_transform, (2, 2)), layer.data);

        // half-resolution grid shifted by one cell to the east
        let fine = resample_nearest(&layer, &[11.0, 0.5, 0.0, 50.0, 0.0, -0.5], (4, 4));
        assert_relative_eq!(fine[[0, 0]], 2.0);
        assert_relative_eq!(fine[[3, 1]], 4.0);
        assert_relative_eq!(fine[[0, 2]], 0.0);
        assert_relative_eq!(fine[[3, 3]], 0.0);
    }

    #[test]
    fn test_nan_is_written_as_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metric.tif");
        let data = array![[f32::NAN, 2.5]];
        write_geotiff(
            &path,
            &[data],
            &["avg".to_string()],
            &[10.0, 0.1, 0.0, 50.0, 0.0, -0.1],
            "",
            OutputType::Float32,
            Some(0.0),
        )
        .unwrap();

        let layer = read_band(&path, 1).unwrap();
        assert_eq!(layer.nodata, Some(0.0));
        assert_relative_eq!(layer.data[[0, 0]], 0.0);
        assert_relative_eq!(layer.data[[0, 1]], 2.5);
        assert_eq!(read_bands(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_output_type_parse() {
        assert_eq!("uint16".parse::<OutputType>().unwrap(), OutputType::UInt16);
        assert!("int8".parse::<OutputType>().is_err());
    }
}
