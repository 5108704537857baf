//! Clone-from-flash image synthesis.
//!
//! In clone mode the source has no uploader; it streams its own flash to the
//! target instead. The stream is a sequence of tag records, each followed by
//! the bytes it introduces:
//!
//! | Tag | Value | Body |
//! |-----|-------|------|
//! | erase + program | `0xFD03` | length (data bytes + 2), word address, data |
//! | program | `0xFE01` | length (data bytes + 2), word address, data |
//! | end | `0xFC04` | length (4), then the image CRC-32 |
//!
//! Tag, length and address words go high byte first; data words go in the
//! order of the flash layout. Every streamed byte, tags included, is folded
//! into a CRC-32; at the end the inverted CRC is appended little-endian and
//! the last block is padded with `0xFF`.

use crate::consts::{
    FLASH_READ_WORDS, SERIAL_BLOCK_LEN_USIZE, TAG_END, TAG_END_LEN, TAG_ERASE_PROGRAM, TAG_PROGRAM,
};
use crate::crc::{Crc32, hi8, lo8};
use crate::error::BootloadError;
use crate::fragment::{BLOCK_FILLER, SerialBlock};
use crate::platform::FlashReader;

/// Page number that terminates the page ranges.
pub const END_OF_IMAGE_PAGE: u8 = 0xff;

/// Byte order of a 16-bit flash word in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum WordOrder {
    /// Low byte first.
    LittleEndian,
    /// High byte first.
    BigEndian,
}

/// An inclusive run of flash pages holding the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct PageRange {
    /// First page.
    pub first: u8,
    /// Last page, inclusive.
    pub last: u8,
}

/// Words streamed raw ahead of the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct HeaderRegion {
    /// Where the header lives.
    pub word_address: u32,
    /// How many words it has; a multiple of 16.
    pub words: u16,
}

/// Where the application lives in the local flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout<'a> {
    /// Pages to stream, in order.
    pub page_ranges: &'a [PageRange],
    /// Bytes per page; a multiple of 32.
    pub page_bytes: u16,
    /// Byte order of data words.
    pub word_order: WordOrder,
    /// Header streamed before the first page.
    pub header: Option<HeaderRegion>,
    /// Bytes of the first page sent as erase+program, the rest as program.
    /// `None` erases and programs the whole first page at once.
    pub first_page_erase_bytes: Option<u16>,
}

impl FlashLayout<'_> {
    fn validate(&self) -> Result<(), BootloadError> {
        let chunk_bytes = (FLASH_READ_WORDS * 2) as u16;
        let page_ok = self.page_bytes != 0 && self.page_bytes % chunk_bytes == 0;
        let split_ok = self
            .first_page_erase_bytes
            .is_none_or(|split| split % chunk_bytes == 0 && split < self.page_bytes);
        let header_ok = self
            .header
            .is_none_or(|h| h.words as usize % FLASH_READ_WORDS == 0);
        if page_ok && split_ok && header_ok {
            Ok(())
        } else {
            Err(BootloadError::InvalidLayout)
        }
    }

    fn page_words(&self) -> u32 {
        self.page_bytes as u32 / 2
    }
}

/// Consumer of synthesized serial blocks.
pub trait BlockSink {
    /// Delivers one full block.
    fn send_block(&mut self, block: &SerialBlock) -> Result<(), BootloadError>;
}

/// Packs a tagged byte stream into serial blocks while running the image CRC.
#[derive(Debug, Clone)]
pub struct CloneStreamer {
    block: SerialBlock,
    index: usize,
    crc: Crc32,
    blocks: u32,
}

impl Default for CloneStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl CloneStreamer {
    /// An empty stream.
    pub const fn new() -> Self {
        Self {
            block: [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE],
            index: 0,
            crc: Crc32::new(),
            blocks: 0,
        }
    }

    /// Image CRC so far.
    pub fn crc(&self) -> Crc32 {
        self.crc
    }

    /// Blocks handed to the sink so far.
    pub fn blocks_sent(&self) -> u32 {
        self.blocks
    }

    /// Appends one byte, flushing the block when it fills up.
    pub fn push_byte<S: BlockSink>(&mut self, sink: &mut S, byte: u8) -> Result<(), BootloadError> {
        self.crc.update_byte(byte);
        self.append(sink, byte)
    }

    fn append<S: BlockSink>(&mut self, sink: &mut S, byte: u8) -> Result<(), BootloadError> {
        self.block[self.index] = byte;
        self.index += 1;
        if self.index == SERIAL_BLOCK_LEN_USIZE {
            self.flush(sink)?;
        }
        Ok(())
    }

    fn flush<S: BlockSink>(&mut self, sink: &mut S) -> Result<(), BootloadError> {
        sink.send_block(&self.block)?;
        self.blocks += 1;
        self.index = 0;
        self.block = [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE];
        Ok(())
    }

    fn push_word<S: BlockSink>(
        &mut self,
        sink: &mut S,
        word: u16,
        order: WordOrder,
    ) -> Result<(), BootloadError> {
        let (first, second) = match order {
            WordOrder::BigEndian => (hi8(word), lo8(word)),
            WordOrder::LittleEndian => (lo8(word), hi8(word)),
        };
        self.push_byte(sink, first)?;
        self.push_byte(sink, second)
    }

    /// Appends a tag record header.
    ///
    /// # Arguments
    /// * `tag` - tag value
    /// * `length` - the tag's length field
    /// * `address` - word address, omitted for the end tag
    pub fn push_tag<S: BlockSink>(
        &mut self,
        sink: &mut S,
        tag: u16,
        length: u16,
        address: Option<u16>,
    ) -> Result<(), BootloadError> {
        self.push_word(sink, tag, WordOrder::BigEndian)?;
        self.push_word(sink, length, WordOrder::BigEndian)?;
        if let Some(address) = address {
            self.push_word(sink, address, WordOrder::BigEndian)?;
        }
        Ok(())
    }

    /// Appends data words.
    pub fn push_words<S: BlockSink>(
        &mut self,
        sink: &mut S,
        words: &[u16],
        order: WordOrder,
    ) -> Result<(), BootloadError> {
        words
            .iter()
            .try_for_each(|word| self.push_word(sink, *word, order))
    }

    /// Appends the inverted CRC and flushes the padded final block.
    ///
    /// # Returns
    /// * The CRC that was appended
    pub fn finish<S: BlockSink>(&mut self, sink: &mut S) -> Result<u32, BootloadError> {
        let crc = self.crc.finish();
        for byte in crc.to_le_bytes() {
            self.append(sink, byte)?;
        }
        if self.index > 0 {
            self.flush(sink)?;
        }
        Ok(crc)
    }
}

/// Streams the application described by `layout` into `sink`.
///
/// Pages are read in 16-word chunks. A page number of
/// [`END_OF_IMAGE_PAGE`] ends the image early; otherwise it ends after the
/// last range.
///
/// # Returns
/// * The image CRC-32 appended after the end tag
pub fn stream_image<F: FlashReader, S: BlockSink>(
    flash: &mut F,
    layout: &FlashLayout<'_>,
    sink: &mut S,
) -> Result<u32, BootloadError> {
    layout.validate()?;
    let mut streamer = CloneStreamer::new();
    let mut first = true;

    'ranges: for range in layout.page_ranges {
        for page in range.first..=range.last {
            if page == END_OF_IMAGE_PAGE {
                break 'ranges;
            }
            stream_page(flash, layout, sink, &mut streamer, page, first)?;
            first = false;
        }
    }

    streamer.push_tag(sink, TAG_END, TAG_END_LEN, None)?;
    streamer.finish(sink)
}

fn stream_page<F: FlashReader, S: BlockSink>(
    flash: &mut F,
    layout: &FlashLayout<'_>,
    sink: &mut S,
    streamer: &mut CloneStreamer,
    page: u8,
    first: bool,
) -> Result<(), BootloadError> {
    let base = page as u32 * layout.page_words();
    let page_bytes = layout.page_bytes;

    if first {
        if let Some(header) = layout.header {
            stream_words(flash, layout, sink, streamer, header.word_address, header.words as u32)?;
        }
        if let Some(split) = layout.first_page_erase_bytes {
            let split_words = split as u32 / 2;
            streamer.push_tag(sink, TAG_ERASE_PROGRAM, tag_len(split)?, Some(tag_addr(base)?))?;
            stream_words(flash, layout, sink, streamer, base, split_words)?;
            let rest = page_bytes - split;
            streamer.push_tag(
                sink,
                TAG_PROGRAM,
                tag_len(rest)?,
                Some(tag_addr(base + split_words)?),
            )?;
            return stream_words(flash, layout, sink, streamer, base + split_words, rest as u32 / 2);
        }
    }

    streamer.push_tag(sink, TAG_ERASE_PROGRAM, tag_len(page_bytes)?, Some(tag_addr(base)?))?;
    stream_words(flash, layout, sink, streamer, base, layout.page_words())
}

fn stream_words<F: FlashReader, S: BlockSink>(
    flash: &mut F,
    layout: &FlashLayout<'_>,
    sink: &mut S,
    streamer: &mut CloneStreamer,
    start: u32,
    words: u32,
) -> Result<(), BootloadError> {
    let mut chunk = [0u16; FLASH_READ_WORDS];
    let mut address = start;
    while address < start + words {
        flash.read_words(address, &mut chunk).map_err(|_e| {
            error!("flash read failed at word {}", address);
            BootloadError::FlashRead(address)
        })?;
        streamer.push_words(sink, &chunk, layout.word_order)?;
        address += FLASH_READ_WORDS as u32;
    }
    Ok(())
}

fn tag_len(data_bytes: u16) -> Result<u16, BootloadError> {
    data_bytes.checked_add(2).ok_or(BootloadError::InvalidLayout)
}

fn tag_addr(word_address: u32) -> Result<u16, BootloadError> {
    u16::try_from(word_address).map_err(|_| BootloadError::InvalidLayout)
}
