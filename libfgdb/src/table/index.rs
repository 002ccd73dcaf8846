use crate::error::{Error, Result};
use crate::reader::ByteReader;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, trace};

const HEADER_BYTES: u64 = 16;
const TRAILER_BYTES: u64 = 16;
const ROWS_PER_BLOCK: u64 = 1024;

/// Maps a 1-based object identifier to a byte offset in the table's data
/// file.
///
/// The offset-index file stores an array of fixed-width (4, 5 or 6 byte)
/// offsets, one per row, optionally compacted by a block-presence bitmap
/// that omits runs of 1024 absent rows. A stored offset of zero marks a
/// deleted or absent row.
#[derive(Debug)]
pub struct OffsetIndexReader<R> {
    rdr: ByteReader<R>,
    offset_size: u32,
    max_object_id: i64,
    num_blocks: u32,
    block_map: Option<BlockMap>,
}

#[derive(Debug)]
struct BlockMap {
    bits: Vec<u8>,
    cached_block: u32,
    cached_rank: u32,
}

impl BlockMap {
    fn bit(&self, block: u32) -> bool {
        self.bits
            .get((block / 8) as usize)
            .is_some_and(|byte| byte >> (block % 8) & 1 == 1)
    }

    /// Number of present blocks before `block`, cached so ascending scans
    /// stay linear overall
    fn rank_before(&mut self, block: u32) -> u32 {
        if block < self.cached_block {
            self.cached_block = 0;
            self.cached_rank = 0;
        }
        let mut rank = self.cached_rank;
        for b in self.cached_block..block {
            rank += u32::from(self.bit(b));
        }
        self.cached_block = block;
        self.cached_rank = rank;
        rank
    }

    fn popcount(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }
}

impl OffsetIndexReader<BufReader<File>> {
    /// Opens an offset-index (`.gdbtablx`) file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or its header is unsupported.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "opening offset index");
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> OffsetIndexReader<R> {
    /// Parses the offset-index header from an already-open byte source.
    ///
    /// # Errors
    ///
    /// Fails for versions other than 3 or 4, offset widths outside
    /// {4, 5, 6}, the v4 sparse variant, or a self-inconsistent block map.
    pub fn from_reader(inner: R) -> Result<Self> {
        let mut rdr = ByteReader::new(inner)?;
        let version = rdr.read_i32()?;
        let num_blocks = rdr.read_i32()?;
        let num_blocks = u32::try_from(num_blocks)
            .map_err(|_| Error::malformed("negative block count in offset index"))?;
        match version {
            3 => Self::from_v3(rdr, num_blocks),
            4 => Self::from_v4(rdr, num_blocks),
            other => Err(Error::unsupported(format!(
                "offset index version {other}"
            ))),
        }
    }

    fn from_v3(mut rdr: ByteReader<R>, num_blocks: u32) -> Result<Self> {
        let num_rows = rdr.read_i32()?;
        let offset_size = check_offset_size(rdr.read_i32()?)?;
        let mut block_map = None;
        if num_blocks > 0 {
            let trailer_pos =
                HEADER_BYTES + ROWS_PER_BLOCK * u64::from(num_blocks) * u64::from(offset_size);
            if trailer_pos + TRAILER_BYTES <= rdr.len() {
                rdr.seek_to(trailer_pos)?;
                let bitmap_words = rdr.read_u32()?;
                let num_bits = rdr.read_u32()?;
                let num_blocks_again = rdr.read_u32()?;
                let _leading_nonzero_words = rdr.read_u32()?;
                if bitmap_words != 0 {
                    if num_blocks_again != num_blocks {
                        return Err(Error::malformed(
                            "offset index trailer disagrees about the block count",
                        ));
                    }
                    let bits = rdr.read_bytes(((num_bits as usize) + 7) / 8)?;
                    let map = BlockMap {
                        bits,
                        cached_block: 0,
                        cached_rank: 0,
                    };
                    if map.popcount() != num_blocks {
                        return Err(Error::malformed(
                            "block map population does not match the block count",
                        ));
                    }
                    trace!(num_bits, num_blocks, "offset index block map loaded");
                    block_map = Some(map);
                }
            } else {
                // tolerated: a dense file cut short of its trailer
                trace!("offset index ends before its trailer section");
            }
        }
        Ok(Self {
            rdr,
            offset_size,
            max_object_id: i64::from(num_rows),
            num_blocks,
            block_map,
        })
    }

    fn from_v4(mut rdr: ByteReader<R>, num_blocks: u32) -> Result<Self> {
        let _unknown = rdr.read_i32()?;
        let offset_size = check_offset_size(rdr.read_i32()?)?;
        let mut max_object_id = 0i64;
        if num_blocks > 0 {
            let trailer_pos =
                HEADER_BYTES + ROWS_PER_BLOCK * u64::from(num_blocks) * u64::from(offset_size);
            rdr.seek_to(trailer_pos)?;
            max_object_id = rdr.read_i64()?;
            let section_bytes = rdr.read_i32()?;
            if section_bytes != 0 {
                return Err(Error::unsupported(
                    "v4 offset index with hole sections",
                ));
            }
        }
        Ok(Self {
            rdr,
            offset_size,
            max_object_id,
            num_blocks,
            block_map: None,
        })
    }

    /// Highest object identifier the index can address, deleted rows
    /// included
    #[must_use]
    pub const fn max_object_id(&self) -> i64 {
        self.max_object_id
    }

    /// Data-file byte offset of the row with object identifier `oid`, or
    /// `None` for a deleted or absent row.
    ///
    /// # Errors
    ///
    /// Fails only on I/O errors; lookups outside the addressed range are
    /// `None`, not errors.
    pub fn row_offset(&mut self, oid: i64) -> Result<Option<u64>> {
        if oid < 1 || oid > self.max_object_id {
            return Ok(None);
        }
        let index = (oid - 1).unsigned_abs();
        let physical = match &mut self.block_map {
            Some(map) => {
                #[allow(clippy::cast_possible_truncation)]
                let block = (index / ROWS_PER_BLOCK) as u32;
                if !map.bit(block) {
                    return Ok(None);
                }
                u64::from(map.rank_before(block)) * ROWS_PER_BLOCK + index % ROWS_PER_BLOCK
            }
            None => index,
        };
        let pos = HEADER_BYTES + physical * u64::from(self.offset_size);
        let area_end = if self.num_blocks > 0 {
            (HEADER_BYTES
                + ROWS_PER_BLOCK * u64::from(self.num_blocks) * u64::from(self.offset_size))
            .min(self.rdr.len())
        } else {
            self.rdr.len()
        };
        if pos + u64::from(self.offset_size) > area_end {
            return Ok(None);
        }
        self.rdr.seek_to(pos)?;
        let offset = match self.offset_size {
            4 => u64::from(self.rdr.read_u32()?),
            5 => self.rdr.read_u40()?,
            6 => self.rdr.read_u48()?,
            _ => return Err(Error::Assertion("offset width was validated at open")),
        };
        Ok((offset != 0).then_some(offset))
    }
}

fn check_offset_size(raw: i32) -> Result<u32> {
    match raw {
        4 | 5 | 6 => Ok(raw.unsigned_abs()),
        other => Err(Error::unsupported(format!(
            "offset width of {other} bytes"
        ))),
    }
}
