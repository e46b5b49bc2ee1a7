//! Stream filters needed to read cross-reference and object streams
//!
//! Only FlateDecode (with PNG and TIFF predictors) is supported. Page content
//! streams are never decoded: their raw bytes pass through untouched.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::object::{Dictionary, Object, Stream};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DecodeError {
    Unsupported(String),
    Corrupt(String),
}

/// Decode a stream's content through all of its filters
pub(crate) fn decode_stream(stream: &Stream) -> Result<Vec<u8>, DecodeError> {
    let filters = stream.filters();
    let params = decode_params(&stream.dict);
    let mut data = stream.content.clone();

    for (i, filter) in filters.iter().enumerate() {
        match filter.as_slice() {
            b"FlateDecode" | b"Fl" => {
                data = inflate(&data)?;
                if let Some(Some(params)) = params.get(i) {
                    data = apply_predictor(data, params)?;
                }
            }
            other => {
                return Err(DecodeError::Unsupported(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        }
    }
    Ok(data)
}

/// Zlib-compress a buffer for FlateDecode output
pub(crate) fn flate_encode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len() * 3);
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        // Writers often get the adler32 trailer wrong; keep what inflated
        Err(_) if !out.is_empty() => Ok(out),
        Err(e) => Err(DecodeError::Corrupt(e.to_string())),
    }
}

/// `/DecodeParms` entry per filter, aligned with `/Filter`
fn decode_params(dict: &Dictionary) -> Vec<Option<&Dictionary>> {
    match dict.get(b"DecodeParms") {
        Some(Object::Dictionary(params)) => vec![Some(params)],
        Some(Object::Array(items)) => items.iter().map(|item| match item {
            Object::Dictionary(params) => Some(params),
            _ => None,
        }).collect(),
        _ => Vec::new(),
    }
}

fn param(params: &Dictionary, key: &[u8], default: i64) -> i64 {
    params.get(key).and_then(Object::as_i64).unwrap_or(default)
}

fn apply_predictor(data: Vec<u8>, params: &Dictionary) -> Result<Vec<u8>, DecodeError> {
    let predictor = param(params, b"Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }
    let colors = param(params, b"Colors", 1).clamp(1, 32) as usize;
    let bits = param(params, b"BitsPerComponent", 8).clamp(1, 16) as usize;
    let columns = usize::try_from(param(params, b"Columns", 1).max(1))
        .map_err(|_| DecodeError::Corrupt("predictor /Columns out of range".into()))?;
    let bytes_per_pixel = (colors * bits).div_ceil(8).max(1);
    if data.is_empty() {
        return Ok(data);
    }
    // A row can never be wider than the whole decoded buffer
    let row_len = (colors * bits)
        .checked_mul(columns)
        .map(|row_bits| row_bits.div_ceil(8))
        .filter(|row_len| *row_len <= data.len())
        .ok_or_else(|| DecodeError::Corrupt(format!("predictor row of {columns} columns")))?;

    match predictor {
        2 => Ok(tiff_predictor(data, row_len, bytes_per_pixel, bits)),
        10..=15 => png_predictor(&data, row_len, bytes_per_pixel),
        other => Err(DecodeError::Unsupported(format!("predictor {other}"))),
    }
}

fn tiff_predictor(mut data: Vec<u8>, row_len: usize, bpp: usize, bits: usize) -> Vec<u8> {
    if bits != 8 {
        return data;
    }
    for row in data.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    data
}

fn png_predictor(data: &[u8], row_len: usize, bpp: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        let (&kind, encoded) = chunk
            .split_first()
            .ok_or_else(|| DecodeError::Corrupt("empty predictor row".into()))?;
        let mut row = encoded.to_vec();
        row.resize(row_len, 0);

        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match kind {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(DecodeError::Corrupt(format!("png filter type {other}")));
                }
            };
        }
        out.extend_from_slice(&row);
        previous = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flate_round_trip() {
        let raw = b"BT /F1 12 Tf (hello) Tj ET".repeat(20);
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("FlateDecode"));
        let stream = Stream::new(dict, flate_encode(&raw).unwrap());
        assert_eq!(decode_stream(&stream).unwrap(), raw);
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of three bytes, second row stored as difference from the first
        let encoded = [2u8, 1, 2, 3, 2, 1, 1, 1];
        let decoded = png_predictor(&encoded, 3, 1).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_oversized_predictor_row_is_corrupt() {
        let mut params = Dictionary::new();
        params.set("Predictor", Object::Integer(12));
        params.set("Columns", Object::Integer(i64::MAX));
        assert!(matches!(
            apply_predictor(vec![2, 0, 0, 0], &params),
            Err(DecodeError::Corrupt(_))
        ));

        params.set("Columns", Object::Integer(4096));
        assert!(matches!(
            apply_predictor(vec![2, 0, 0, 0], &params),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unsupported_filter() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("LZWDecode"));
        let stream = Stream::new(dict, vec![1, 2, 3]);
        assert_eq!(
            decode_stream(&stream),
            Err(DecodeError::Unsupported("LZWDecode".into()))
        );
    }

    #[test]
    fn test_unfiltered_stream_passes_through() {
        let stream = Stream::new(Dictionary::new(), b"q Q".to_vec());
        assert_eq!(decode_stream(&stream).unwrap(), b"q Q");
    }
}
