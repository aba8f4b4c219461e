use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::error::DecodeError;

/// One decoded event of the standard waveform firmware
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub board_id: u8,
    pub channel_mask: u16,
    pub event_counter: u32,
    pub trigger_time_tag: u32,
    /// (channel, samples) in ascending channel order
    pub channels: Vec<(u32, Vec<u16>)>,
}

impl RawEvent {
    pub fn samples(&self, channel: u32) -> Option<&[u16]> {
        self.channels
            .iter()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, samples)| samples.as_slice())
    }
}

/// BlockDecoder walks the events of one block transfer.
///
/// Events are laid out back to back as little-endian 32-bit words:
///
/// - word 0: bits 31..28 header marker `0xA`, bits 27..0 event size in words (header included)
/// - word 1: bits 31..27 board id, bits 7..0 channel mask (channels 0-7)
/// - word 2: bits 31..24 channel mask (channels 8-15), bits 23..0 event counter
/// - word 3: trigger time tag
///
/// followed by the samples of each channel in the mask, ascending, two samples per word with
/// the low half first. A malformed event yields an error; decoding resumes at the next event
/// if the declared size could be trusted, otherwise the rest of the block is abandoned.
#[derive(Debug)]
pub struct BlockDecoder<'a> {
    block: &'a [u8],
    n_words: usize,
    position: usize,
}

impl<'a> BlockDecoder<'a> {
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            n_words: block.len() / WORD_SIZE_BYTES,
            position: 0,
        }
    }

    fn word(&self, index: usize) -> u32 {
        let start = index * WORD_SIZE_BYTES;
        LittleEndian::read_u32(&self.block[start..start + WORD_SIZE_BYTES])
    }

    fn abandon(&mut self) {
        self.position = self.n_words;
    }

    fn decode_event(&self, offset: usize, size: usize) -> Result<RawEvent, DecodeError> {
        let word1 = self.word(offset + 1);
        let word2 = self.word(offset + 2);
        let channel_mask = ((word1 & CHANNEL_MASK_BITS) | ((word2 >> 24) << 8)) as u16;
        let n_enabled = channel_mask.count_ones();
        let payload = size - EVENT_HEADER_WORDS;

        let mut event = RawEvent {
            board_id: (word1 >> BOARD_ID_SHIFT) as u8,
            channel_mask,
            event_counter: word2 & EVENT_COUNTER_MASK,
            trigger_time_tag: self.word(offset + 3),
            channels: Vec::with_capacity(n_enabled as usize),
        };

        if n_enabled == 0 {
            if payload != 0 {
                return Err(DecodeError::UnevenPayload {
                    payload,
                    channels: 0,
                });
            }
            return Ok(event);
        }
        if payload % n_enabled as usize != 0 {
            return Err(DecodeError::UnevenPayload {
                payload,
                channels: n_enabled,
            });
        }

        let words_per_channel = payload / n_enabled as usize;
        let mut cursor = offset + EVENT_HEADER_WORDS;
        for channel in (0..MAX_CHANNELS).filter(|ch| channel_mask & (1 << ch) != 0) {
            let mut samples = Vec::with_capacity(words_per_channel * 2);
            for index in cursor..cursor + words_per_channel {
                let word = self.word(index);
                samples.push((word & 0xFFFF) as u16);
                samples.push((word >> 16) as u16);
            }
            cursor += words_per_channel;
            event.channels.push((channel, samples));
        }
        Ok(event)
    }
}

impl Iterator for BlockDecoder<'_> {
    type Item = Result<RawEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.n_words {
            return None;
        }
        let offset = self.position;
        let header = self.word(offset);

        let marker = header >> 28;
        if marker != EVENT_HEADER_MARKER {
            self.abandon();
            return Some(Err(DecodeError::BadMarker { offset, marker }));
        }
        let size = (header & EVENT_SIZE_MASK) as usize;
        if size < EVENT_HEADER_WORDS {
            self.abandon();
            return Some(Err(DecodeError::Undersized { offset, size }));
        }
        let available = self.n_words - offset;
        if size > available {
            self.abandon();
            return Some(Err(DecodeError::Truncated {
                offset,
                size,
                available,
            }));
        }

        self.position = offset + size;
        Some(self.decode_event(offset, size))
    }
}

/// Encode one event in the standard firmware layout.
///
/// All channels must carry the same number of samples; an odd sample count is padded with a
/// zero sample to fill the last word. Channels at or beyond [`MAX_CHANNELS`] are left out.
/// Used by the simulated digitizer.
pub fn encode_event(
    board_id: u8,
    event_counter: u32,
    trigger_time_tag: u32,
    channels: &[(u32, &[u16])],
) -> Vec<u8> {
    let mut sorted: Vec<&(u32, &[u16])> = channels
        .iter()
        .filter(|(channel, _)| *channel < MAX_CHANNELS)
        .collect();
    sorted.sort_by_key(|(channel, _)| *channel);

    let channel_mask = sorted
        .iter()
        .fold(0u32, |mask, (channel, _)| mask | (1 << channel));
    let words_per_channel = sorted
        .iter()
        .map(|(_, samples)| samples.len().div_ceil(2))
        .max()
        .unwrap_or(0);
    let size = EVENT_HEADER_WORDS + words_per_channel * sorted.len();

    let mut words = Vec::with_capacity(size);
    words.push((EVENT_HEADER_MARKER << 28) | (size as u32 & EVENT_SIZE_MASK));
    words.push(((board_id as u32) << BOARD_ID_SHIFT) | (channel_mask & CHANNEL_MASK_BITS));
    words.push(((channel_mask >> 8) << 24) | (event_counter & EVENT_COUNTER_MASK));
    words.push(trigger_time_tag);
    for (_, samples) in sorted {
        for index in 0..words_per_channel {
            let low = samples.get(2 * index).copied().unwrap_or(0) as u32;
            let high = samples.get(2 * index + 1).copied().unwrap_or(0) as u32;
            words.push(low | (high << 16));
        }
    }

    let mut bytes = vec![0u8; words.len() * WORD_SIZE_BYTES];
    LittleEndian::write_u32_into(&words, &mut bytes);
    bytes
}
