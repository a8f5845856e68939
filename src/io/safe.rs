use crate::geometry::Polygon;
use crate::types::{ArdError, ArdResult};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Reader for Sentinel-1 SAFE products, zipped or unpacked
pub struct SafeReader {
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
}

impl SafeReader {
    /// Create a new reader for a `.zip` archive or a `.SAFE` directory
    pub fn new<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(ArdError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }

        Ok(Self { path, archive: None })
    }

    fn is_directory(&self) -> bool {
        self.path.is_dir()
    }

    /// Open the ZIP archive
    fn open_archive(&mut self) -> ArdResult<&mut ZipArchive<File>> {
        if self.archive.is_none() {
            let file = File::open(&self.path)?;
            self.archive = Some(ZipArchive::new(file)?);
        }
        self.archive
            .as_mut()
            .ok_or_else(|| ArdError::Processing(format!("Could not open {}", self.path.display())))
    }

    /// List all files in the product, relative to its root
    pub fn list_files(&mut self) -> ArdResult<Vec<String>> {
        if self.is_directory() {
            let mut files = Vec::new();
            collect_files(&self.path, &self.path, &mut files)?;
            return Ok(files);
        }

        let archive = self.open_archive()?;
        let mut files = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            files.push(archive.by_index(i)?.name().to_string());
        }
        Ok(files)
    }

    /// Read a text file from the product
    pub fn read_to_string(&mut self, name: &str) -> ArdResult<String> {
        let mut content = String::new();
        if self.is_directory() {
            File::open(self.path.join(name))?.read_to_string(&mut content)?;
        } else {
            let archive = self.open_archive()?;
            archive.by_name(name)?.read_to_string(&mut content)?;
        }
        Ok(content)
    }

    /// Annotation XMLs, one per swath and polarisation
    pub fn find_annotation_files(&mut self) -> ArdResult<Vec<String>> {
        let mut annotations: Vec<String> = self
            .list_files()?
            .into_iter()
            .filter(|f| {
                f.contains("annotation/")
                    && f.ends_with(".xml")
                    && !f.contains("calibration/")
                    && !f.contains("rfi/")
            })
            .collect();

        if annotations.is_empty() {
            return Err(ArdError::XmlParsing(format!(
                "No annotation files found in {}",
                self.path.display()
            )));
        }
        annotations.sort();
        Ok(annotations)
    }

    fn find_manifest(&mut self) -> ArdResult<String> {
        self.list_files()?
            .into_iter()
            .find(|f| f.ends_with("manifest.safe"))
            .ok_or_else(|| {
                ArdError::XmlParsing(format!("No manifest.safe in {}", self.path.display()))
            })
    }

    /// Scene footprint from the `gml:coordinates` of the manifest
    pub fn product_polygon(&mut self) -> ArdResult<Polygon> {
        let manifest = self.find_manifest()?;
        let xml = self.read_to_string(&manifest)?;
        let coordinates = extract_value(&xml, "gml:coordinates").ok_or_else(|| {
            ArdError::XmlParsing("No footprint coordinates in manifest".to_string())
        })?;
        parse_gml_coordinates(&coordinates)
    }

    /// Read every archive member so that corrupted members surface as errors
    pub fn verify_archive<P: AsRef<Path>>(zip_path: P) -> ArdResult<()> {
        let file = File::open(zip_path.as_ref())?;
        let mut archive = ZipArchive::new(file)?;
        for i in 0..archive.len() {
            let mut member = archive.by_index(i)?;
            std::io::copy(&mut member, &mut std::io::sink())?;
        }
        log::debug!(
            "Verified {} members of {}",
            archive.len(),
            zip_path.as_ref().display()
        );
        Ok(())
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> ArdResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Simple XML value extraction helper
fn extract_value(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)?;
    Some(xml[start..start + end].trim().to_string())
}

/// "lat,lon lat,lon ..." to a polygon in lon/lat order
fn parse_gml_coordinates(coordinates: &str) -> ArdResult<Polygon> {
    let coords = coordinates
        .split_whitespace()
        .map(|pair| {
            let mut parts = pair.split(',').map(str::parse::<f64>);
            match (parts.next(), parts.next()) {
                (Some(Ok(lat)), Some(Ok(lon))) => Ok((lon, lat)),
                _ => Err(ArdError::XmlParsing(format!(
                    "Invalid footprint coordinate: {}",
                    pair
                ))),
            }
        })
        .collect::<ArdResult<Vec<_>>>()?;
    Polygon::new(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xfdu:XFDU><metadataSection><metadataObject ID="measurementFrameSet">
<metadataWrap><xmlData><safe:frameSet><safe:frame><safe:footPrint srsName="http://www.opengis.net/gml/srs/epsg.xml#4326">
<gml:coordinates>48.0,11.0 48.0,14.0 50.0,14.0 50.0,11.0</gml:coordinates>
</safe:footPrint></safe:frame></safe:frameSet></xmlData></metadataWrap></metadataObject></metadataSection></xfdu:XFDU>"#;

    fn write_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("S1A_TEST.SAFE/manifest.safe", options).unwrap();
        zip.write_all(MANIFEST.as_bytes()).unwrap();
        zip.start_file("S1A_TEST.SAFE/annotation/s1a-iw1-slc-vv-001.xml", options).unwrap();
        zip.write_all(b"<product/>").unwrap();
        zip.start_file("S1A_TEST.SAFE/annotation/calibration/calibration-s1a-iw1.xml", options).unwrap();
        zip.write_all(b"<calibration/>").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_zip_footprint_and_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("scene.zip");
        write_zip(&zip_path);

        let mut reader = SafeReader::new(&zip_path).unwrap();
        assert_eq!(reader.list_files().unwrap().len(), 3);
        assert_eq!(
            reader.find_annotation_files().unwrap(),
            vec!["S1A_TEST.SAFE/annotation/s1a-iw1-slc-vv-001.xml".to_string()]
        );

        let footprint = reader.product_polygon().unwrap();
        assert_eq!(footprint.exterior[0], (11.0, 48.0));
        assert_eq!(footprint.bbox().max_lat, 50.0);

        assert!(SafeReader::verify_archive(&zip_path).is_ok());
    }

    #[test]
    fn test_safe_directory() {
        let dir = tempfile::tempdir().unwrap();
        let safe = dir.path().join("S1A_TEST.SAFE");
        std::fs::create_dir_all(safe.join("annotation")).unwrap();
        std::fs::write(safe.join("manifest.safe"), MANIFEST).unwrap();
        std::fs::write(safe.join("annotation/s1a-iw2-slc-vh-002.xml"), "<product/>").unwrap();

        let mut reader = SafeReader::new(&safe).unwrap();
        assert_eq!(
            reader.find_annotation_files().unwrap(),
            vec!["annotation/s1a-iw2-slc-vh-002.xml".to_string()]
        );
        assert_eq!(reader.product_polygon().unwrap().exterior.len(), 4);
    }

    #[test]
    fn test_verify_rejects_truncated_archive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("scene.zip");
        write_zip(&zip_path);
        let bytes = std::fs::read(&zip_path).unwrap();
        std::fs::write(&zip_path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(SafeReader::verify_archive(&zip_path).is_err());
    }
}
