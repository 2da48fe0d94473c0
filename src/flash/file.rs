//! Flash image file
//!
//! A partition backed by a regular file, used by host tooling to inspect or
//! prepare images. Geometry lives in a bincode sidecar next to the image:
//!
//! ```text
//!   store.img        (sector_size * sector_count raw bytes)
//!   store.img.geom   (bincode-encoded FlashGeometry)
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{
    check_alignment, check_bounds, check_sectors, FlashError, FlashPartition, FlashResult,
    ERASED_BYTE,
};

/// Sector layout of a flash image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashGeometry {
    pub sector_size: usize,
    pub sector_count: usize,
    pub alignment: usize,
}

impl FlashGeometry {
    fn validate(&self) -> FlashResult<()> {
        if self.sector_size == 0 || self.sector_count == 0 || self.alignment == 0 {
            return Err(FlashError::Image("geometry dimensions must be non-zero".to_string()));
        }
        if self.sector_size % self.alignment != 0 {
            return Err(FlashError::Image(format!(
                "sector size {} is not a multiple of alignment {}",
                self.sector_size, self.alignment
            )));
        }
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        self.sector_size * self.sector_count
    }
}

/// Flash partition stored in a file
#[derive(Debug)]
pub struct FileFlash {
    file: File,
    geometry: FlashGeometry,
}

impl FileFlash {
    const GEOMETRY_SUFFIX: &'static str = "geom";

    /// Create (or overwrite) an erased image with the given geometry
    pub fn create(path: &Path, geometry: FlashGeometry) -> FlashResult<Self> {
        geometry.validate()?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let sector = vec![ERASED_BYTE; geometry.sector_size];
        for _ in 0..geometry.sector_count {
            file.write_all(&sector)?;
        }
        file.sync_all()?;

        let encoded = bincode::serialize(&geometry)
            .map_err(|e| FlashError::Image(format!("encode geometry: {}", e)))?;
        std::fs::write(Self::geometry_path(path), encoded)?;

        Ok(Self { file, geometry })
    }

    /// Open an existing image, reading its geometry sidecar
    pub fn open(path: &Path) -> FlashResult<Self> {
        let encoded = std::fs::read(Self::geometry_path(path))?;
        let geometry: FlashGeometry = bincode::deserialize(&encoded)
            .map_err(|e| FlashError::Image(format!("decode geometry: {}", e)))?;
        geometry.validate()?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len != geometry.size_bytes() {
            return Err(FlashError::Image(format!(
                "image is {} bytes, geometry expects {}",
                len,
                geometry.size_bytes()
            )));
        }

        Ok(Self { file, geometry })
    }

    /// Geometry of this image
    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    /// "store.img" → "store.img.geom"
    fn geometry_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(Self::GEOMETRY_SUFFIX);
        PathBuf::from(name)
    }
}

impl FlashPartition for FileFlash {
    fn sector_size_bytes(&self) -> usize {
        self.geometry.sector_size
    }

    fn sector_count(&self) -> usize {
        self.geometry.sector_count
    }

    fn alignment_bytes(&self) -> usize {
        self.geometry.alignment
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> FlashResult<()> {
        check_bounds(address, buf.len(), self.geometry.size_bytes())?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(address as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> FlashResult<()> {
        check_bounds(address, data.len(), self.geometry.size_bytes())?;
        check_alignment(address, data.len(), self.geometry.alignment)?;

        let mut current = vec![0u8; data.len()];
        self.read(address, &mut current)?;
        if let Some(pos) = current.iter().position(|&b| b != ERASED_BYTE) {
            return Err(FlashError::NotErased {
                address: address + pos,
            });
        }

        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> FlashResult<()> {
        check_sectors(sector_index, count, self.geometry.sector_count)?;

        let sector = vec![ERASED_BYTE; self.geometry.sector_size];
        self.file
            .seek(SeekFrom::Start((sector_index * self.geometry.sector_size) as u64))?;
        for _ in 0..count {
            self.file.write_all(&sector)?;
        }
        self.file.sync_data()?;
        Ok(())
    }
}
