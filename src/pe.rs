// Loader stub for PE containers: reads the file into memory and checks
// the MZ magic. Header parsing and export walking are not implemented.

use byteorder::{LittleEndian, ReadBytesExt};

const MZ_MAGIC: u16 = 0x5a4d;

pub struct PeLibrary {
    pub path: String,
    data: Vec<u8>,
}

impl PeLibrary {
    pub fn load(path: &str) -> Result<PeLibrary, String> {
        let data = std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
        let magic = (&data[..]).read_u16::<LittleEndian>().unwrap_or(0);
        if magic != MZ_MAGIC {
            log::warn!("{} does not start with an MZ header", path);
        }
        Ok(PeLibrary {
            path: path.to_string(),
            data,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
