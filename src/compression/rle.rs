use super::ByteVec;
use crate::error::{Error, Result};

// a repetition costs two bytes, so runs shorter than
// this compress better as part of a literal
const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 128;
const MAX_LITERAL_LENGTH: usize = 128;

/// Compress a tile buffer with byte-oriented run-length encoding.
///
/// A count byte `n`, read as `i8`, is followed by either one byte to be
/// repeated `n + 1` times (`n >= 0`), or by `-n + 1` literal bytes
/// (`n < 0`). The reserved count byte `-128` is never emitted.
pub fn compress_bytes(bytes: &[u8]) -> ByteVec {
    let mut compressed = Vec::with_capacity(bytes.len() / 2 + 2);
    let mut index = 0;

    while index < bytes.len() {
        let mut run_end = index + 1;
        while run_end < bytes.len()
            && bytes[run_end] == bytes[index]
            && run_end - index < MAX_RUN_LENGTH
        {
            run_end += 1;
        }

        if run_end - index >= MIN_RUN_LENGTH {
            compressed.push((run_end - index - 1) as u8);
            compressed.push(bytes[index]);
            index = run_end;
            continue;
        }

        let mut literal_end = index + 1;
        while literal_end < bytes.len()
            && literal_end - index < MAX_LITERAL_LENGTH
            && !starts_run(bytes, literal_end)
        {
            literal_end += 1;
        }

        let literal = &bytes[index .. literal_end];
        if literal.len() == 1 {
            // a lone byte cannot be a literal run, so repeat it once
            compressed.push(0);
            compressed.push(literal[0]);
        }
        else {
            compressed.push((-((literal.len() - 1) as i32)) as u8);
            compressed.extend_from_slice(literal);
        }

        index = literal_end;
    }

    compressed
}

// whether a run worth a repetition starts at this index
fn starts_run(bytes: &[u8], index: usize) -> bool {
    index + MIN_RUN_LENGTH <= bytes.len()
        && bytes[index + 1 .. index + MIN_RUN_LENGTH].iter().all(|&byte| byte == bytes[index])
}

/// Decompress a run-length stream back into tile bytes.
pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<ByteVec> {
    let mut remaining = compressed;
    let mut decompressed = Vec::with_capacity(expected_byte_size);

    while !remaining.is_empty() {
        let count = take_1(&mut remaining)? as i8;

        if count == -128 {
            continue; // reserved, skipped by decoders
        }

        if count < 0 {
            // take the next '-count + 1' bytes as-is
            let values = take_n(&mut remaining, (-i32::from(count)) as usize + 1)?;
            decompressed.extend_from_slice(values);
        }
        else {
            // repeat the next value 'count + 1' times
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }

        if decompressed.len() > expected_byte_size {
            return Err(Error::corrupt("run length overrun"));
        }
    }

    Ok(decompressed)
}

fn take_1(slice: &mut &[u8]) -> Result<u8> {
    if !slice.is_empty() {
        let result = slice[0];
        *slice = &slice[1..];
        Ok(result)
    }
    else {
        Err(Error::corrupt("run length data truncated"))
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    }
    else {
        Err(Error::corrupt("run length data truncated"))
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(bytes: &[u8]) -> ByteVec {
        let compressed = compress_bytes(bytes);
        assert_eq!(decompress_bytes(&compressed, bytes.len()).unwrap(), bytes);
        compressed
    }

    #[test]
    fn uniform_tile_compresses_to_two_bytes_per_run() {
        let compressed = roundtrip(&[0xff_u8; 16]);
        assert_eq!(compressed, vec![15, 0xff]);
    }

    #[test]
    fn a_run_of_129_bytes_splits_into_a_full_repeat_and_one_more() {
        let compressed = roundtrip(&[7_u8; 129]);
        assert_eq!(compressed, vec![127, 7, 0, 7]);
    }

    #[test]
    fn count_byte_128_is_never_emitted() {
        let mut bytes = Vec::new();
        for value in 0 .. 200_u8 {
            bytes.extend(std::iter::repeat(value).take((value as usize % 140) + 1));
        }

        let compressed = roundtrip(&bytes);

        // walk the records to prove 0x80 never appears as a count
        let mut remaining = compressed.as_slice();
        while !remaining.is_empty() {
            let count = remaining[0] as i8;
            assert_ne!(count, -128);
            let skip = if count < 0 { (-i32::from(count)) as usize + 2 } else { 2 };
            remaining = &remaining[skip ..];
        }
    }

    #[test]
    fn reserved_count_byte_is_skipped_when_decoding() {
        let decompressed = decompress_bytes(&[0x80, 2, 9, 0x80], 3).unwrap();
        assert_eq!(decompressed, vec![9, 9, 9]);
    }

    #[test]
    fn lone_bytes_become_single_repeats() {
        let compressed = roundtrip(&[5]);
        assert_eq!(compressed, vec![0, 5]);
    }

    #[test]
    fn mixed_literals_and_runs() {
        roundtrip(&[1, 2, 3, 3, 3, 3, 4, 5, 6, 6, 1, 1, 1, 9]);
        roundtrip(&[1, 2]);
        roundtrip(&[1, 1]);
        roundtrip(&[]);
    }

    #[test]
    fn overruns_and_truncations_are_corrupt() {
        assert!(decompress_bytes(&[3, 1], 2).is_err());     // repeat past the tile end
        assert!(decompress_bytes(&[5], 8).is_err());        // repeat value missing
        assert!(decompress_bytes(&[0xfd, 1, 2], 8).is_err()); // literal of 4 truncated
    }
}
