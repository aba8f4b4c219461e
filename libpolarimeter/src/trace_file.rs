use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::channel_roles::Role;
use super::constants::{
    MAX_RECORD_LENGTH, TRACE_FILE_HEADER_BYTES, TRACE_FILE_MAGIC, TRACE_FILE_VERSION,
    TRACE_HIT_MIN_BYTES,
};
use super::error::TraceFileError;
use super::hit::HitData;

// Trace file layout (little-endian):
// magic "PWAV" | u16 version | u32 hit count
// per hit: u16 module | u64 timestamp | 4 x (u32 sample count | count x u16 samples)
// Waveforms are stored in role order: in-plane, out-plane 1, out-plane 2, beam.

/// Write hits to a trace file, replacing any existing file
pub fn write_trace_file(path: &Path, hits: &[HitData]) -> Result<(), TraceFileError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(TRACE_FILE_MAGIC)?;
    writer.write_u16::<LittleEndian>(TRACE_FILE_VERSION)?;
    writer.write_u32::<LittleEndian>(hits.len() as u32)?;
    for hit in hits {
        writer.write_u16::<LittleEndian>(hit.module)?;
        writer.write_u64::<LittleEndian>(hit.timestamp)?;
        for role in Role::ALL {
            let samples = hit.samples(role);
            writer.write_u32::<LittleEndian>(samples.len() as u32)?;
            for sample in samples {
                writer.write_u16::<LittleEndian>(*sample)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read every hit of a trace file
pub fn read_trace_file(path: &Path) -> Result<Vec<HitData>, TraceFileError> {
    if !path.exists() {
        return Err(TraceFileError::BadFilePath(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != TRACE_FILE_MAGIC {
        return Err(TraceFileError::BadMagic);
    }
    let version = reader.read_u16::<LittleEndian>()?;
    if version != TRACE_FILE_VERSION {
        return Err(TraceFileError::UnsupportedVersion(version));
    }

    // The header is untrusted: bound every count by what the file can actually hold
    let n_hits = reader.read_u32::<LittleEndian>()?;
    let max_hits = file_size.saturating_sub(TRACE_FILE_HEADER_BYTES) / TRACE_HIT_MIN_BYTES;
    if n_hits as u64 > max_hits {
        return Err(TraceFileError::BadHitCount {
            declared: n_hits,
            max: max_hits,
        });
    }
    let mut hits = Vec::with_capacity(n_hits as usize);
    for idx in 0..n_hits as usize {
        let module = reader.read_u16::<LittleEndian>()?;
        let timestamp = reader.read_u64::<LittleEndian>()?;
        let mut hit = HitData::new(module, timestamp);
        for role in Role::ALL {
            let count = reader.read_u32::<LittleEndian>()?;
            if count as usize > MAX_RECORD_LENGTH {
                return Err(TraceFileError::BadSampleCount { hit: idx, count });
            }
            let mut samples = vec![0u16; count as usize];
            reader.read_u16_into::<LittleEndian>(&mut samples)?;
            hit = hit.with_samples(role, samples);
        }
        hits.push(hit);
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.pwav");
        let hits = vec![
            HitData::new(1, 100)
                .with_samples(Role::InPlane, vec![8000, 8100, 9000])
                .with_samples(Role::Beam, vec![1, 2, 3]),
            HitData::new(1, 250).with_samples(Role::OutPlane2, vec![7; 5]),
        ];
        write_trace_file(&path, &hits).unwrap();
        assert_eq!(read_trace_file(&path).unwrap(), hits);
    }

    #[test]
    fn test_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pwav");
        assert!(matches!(
            read_trace_file(&missing),
            Err(TraceFileError::BadFilePath(_))
        ));

        let garbage = dir.path().join("garbage.pwav");
        std::fs::write(&garbage, b"NOPE\x01\x00").unwrap();
        assert!(matches!(
            read_trace_file(&garbage),
            Err(TraceFileError::BadMagic)
        ));

        let future = dir.path().join("future.pwav");
        std::fs::write(&future, b"PWAV\x02\x00\x00\x00\x00\x00").unwrap();
        assert!(matches!(
            read_trace_file(&future),
            Err(TraceFileError::UnsupportedVersion(2))
        ));

        let truncated = dir.path().join("truncated.pwav");
        std::fs::write(&truncated, b"PWAV\x01\x00\x05\x00\x00\x00").unwrap();
        assert!(matches!(
            read_trace_file(&truncated),
            Err(TraceFileError::BadHitCount { declared: 5, max: 0 })
        ));
    }

    #[test]
    fn test_corrupt_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.pwav");
        write_trace_file(&path, &[HitData::new(0, 1)]).unwrap();

        // Sample count of the first waveform, right after module and timestamp
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_trace_file(&path),
            Err(TraceFileError::BadSampleCount {
                hit: 0,
                count: u32::MAX
            })
        ));

        // A plausible sample count in a file cut short
        bytes[20..24].copy_from_slice(&1000u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_trace_file(&path),
            Err(TraceFileError::IOError(_))
        ));

        bytes[6..10].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_trace_file(&path),
            Err(TraceFileError::BadHitCount {
                declared: u32::MAX,
                max: 1
            })
        ));
    }
}
