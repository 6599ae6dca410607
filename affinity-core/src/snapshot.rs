//! On-disk vote table snapshot for warm restarts.
//!
//! ```text
//! last_load_time:f64 first_load_time:f64 window_days:i32
//! click_weight:f32 submission_weight:f32 mod_weight:f32 save_weight:f32
//! user_count:i32 (user_id:i32 records){user_count}
//! ```
//!
//! `records` is the quantized record list with a fixed scale of 1, so
//! reloaded scores are within 1/128 of the saved ones. Little endian
//! throughout. Reading is lenient: a short read yields zeros for the
//! remaining scalars and stops at the last complete user.

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::vector::{SparseVector, UserId};
use crate::votes::{SignalWeights, VoteTable};

/// Scale used for snapshot records.
const SNAPSHOT_SCALE: f32 = 1.0;

/// Reads scalars until the first short read, then yields zeros.
struct LenientReader<R> {
    inner: R,
    short: bool,
}

impl<R: Read> LenientReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, short: false }
    }

    fn read<T: Default>(&mut self, f: impl FnOnce(&mut R) -> io::Result<T>) -> T {
        if self.short {
            return T::default();
        }
        match f(&mut self.inner) {
            Ok(v) => v,
            Err(_) => {
                self.short = true;
                T::default()
            }
        }
    }

    fn f64(&mut self) -> f64 {
        self.read(|r| r.read_f64::<LittleEndian>())
    }

    fn f32(&mut self) -> f32 {
        self.read(|r| r.read_f32::<LittleEndian>())
    }

    fn i32(&mut self) -> i32 {
        self.read(|r| r.read_i32::<LittleEndian>())
    }
}

impl VoteTable {
    /// Write to any writer
    pub fn write_snapshot<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_f64::<LittleEndian>(self.last_load_time())?;
        writer.write_f64::<LittleEndian>(self.first_load_time())?;
        writer.write_i32::<LittleEndian>(self.window_days() as i32)?;

        let w = self.weights();
        writer.write_f32::<LittleEndian>(w.click)?;
        writer.write_f32::<LittleEndian>(w.submission)?;
        writer.write_f32::<LittleEndian>(w.mod_)?;
        writer.write_f32::<LittleEndian>(w.save)?;

        writer.write_i32::<LittleEndian>(self.len() as i32)?;
        for (user, vector) in self.users() {
            writer.write_i32::<LittleEndian>(user as i32)?;
            vector.write_records(writer, SNAPSHOT_SCALE)?;
        }
        Ok(())
    }

    /// Read from any reader. Never fails; see the module docs.
    pub fn read_snapshot<R: Read>(reader: R) -> VoteTable {
        let mut r = LenientReader::new(reader);

        let last = r.f64();
        let first = r.f64();
        let window_days = r.i32().max(0) as u32;
        let weights = SignalWeights {
            click: r.f32(),
            submission: r.f32(),
            mod_: r.f32(),
            save: r.f32(),
        };
        let user_count = r.i32().max(0);

        let mut table = VoteTable::new(window_days, weights);
        table.set_watermarks(first, last);

        for _ in 0..user_count {
            let user = r.i32();
            if r.short {
                break;
            }
            let (vector, complete) =
                SparseVector::read_records(&mut r.inner, user as UserId, SNAPSHOT_SCALE);
            if !complete {
                log::warn!("[snapshot] truncated record list for user {}", user);
                break;
            }
            table.insert_user(vector);
        }

        if r.short {
            log::warn!(
                "[snapshot] short read, loaded {} of {} users",
                table.len(),
                user_count
            );
        }
        table
    }

    pub fn to_snapshot_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_snapshot(&mut buf);
        buf
    }

    pub fn from_snapshot_bytes(data: &[u8]) -> VoteTable {
        Self::read_snapshot(Cursor::new(data))
    }
}

/// Saves atomically: write `<path>.tmp`, then rename over `path`.
pub async fn save_snapshot(votes: &VoteTable, path: &Path) -> Result<()> {
    let bytes = votes.to_snapshot_bytes();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    log::info!(
        "[snapshot] saved {} users ({} bytes) to {:?}",
        votes.len(),
        bytes.len(),
        path
    );
    Ok(())
}

/// Loads a snapshot; `Ok(None)` when the file does not exist.
pub async fn load_snapshot(path: &Path) -> Result<Option<VoteTable>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let table = VoteTable::from_snapshot_bytes(&data);
    log::info!("[snapshot] loaded {} users from {:?}", table.len(), path);
    Ok(Some(table))
}
