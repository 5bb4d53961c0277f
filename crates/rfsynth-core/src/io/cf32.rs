use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::types::IQSample;

/// Two little-endian float32 values per sample.
pub const BYTES_PER_SAMPLE: usize = 8;

/// Encode samples as interleaved little-endian float32 pairs.
pub fn to_bytes(samples: &[IQSample]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        data.extend_from_slice(&(sample.re as f32).to_le_bytes());
        data.extend_from_slice(&(sample.im as f32).to_le_bytes());
    }
    data
}

/// Decode interleaved little-endian float32 pairs.
///
/// Fails with `InvalidData` when the length is not a whole number of samples.
pub fn parse_bytes(data: &[u8]) -> io::Result<Vec<IQSample>> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{} bytes is not a whole number of {}-byte samples",
                data.len(),
                BYTES_PER_SAMPLE
            ),
        ));
    }

    Ok(data
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| {
            let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            IQSample::new(re as f64, im as f64)
        })
        .collect())
}

/// Write samples to any writer; returns the number of samples written.
pub fn write_samples<W: Write>(writer: &mut W, samples: &[IQSample]) -> io::Result<usize> {
    for sample in samples {
        writer.write_all(&(sample.re as f32).to_le_bytes())?;
        writer.write_all(&(sample.im as f32).to_le_bytes())?;
    }
    Ok(samples.len())
}

/// Read every remaining sample from a reader.
pub fn read_samples<R: Read>(reader: &mut R) -> io::Result<Vec<IQSample>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    parse_bytes(&data)
}

pub fn read_cf32_file(path: impl AsRef<Path>) -> io::Result<Vec<IQSample>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_samples(&mut reader)
}

pub fn write_cf32_file(path: impl AsRef<Path>, samples: &[IQSample]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_samples(&mut writer, samples)?;
    writer.flush()
}
