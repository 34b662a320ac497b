#![allow(dead_code)]

use isoinspect::{
    MemoryReader, ParseContext, ParseEvent, ParseOptions, ParsePipeline, ParseTree,
};

/// `[size][type][payload]`
pub fn bx(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

/// Box with a version/flags prefix.
pub fn full(typ: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    bx(typ, &body)
}

pub fn cat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

pub fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn ftyp() -> Vec<u8> {
    bx(b"ftyp", &[b"isom".as_slice(), &512u32.to_be_bytes(), b"isom", b"avc1"].concat())
}

pub fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&u32s(&[0, 0, timescale, duration]));
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
    p.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
    p.extend_from_slice(&[0u8; 70]);
    p.extend_from_slice(&2u32.to_be_bytes());
    full(b"mvhd", 0, 0, &p)
}

pub fn tkhd(track_id: u32, duration: u32, flags: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&u32s(&[0, 0, track_id, 0, duration]));
    p.extend_from_slice(&[0u8; 8]);
    p.extend_from_slice(&0i16.to_be_bytes()); // layer
    p.extend_from_slice(&0i16.to_be_bytes()); // alternate_group
    p.extend_from_slice(&0u16.to_be_bytes()); // volume
    p.extend_from_slice(&[0u8; 38]);
    p.extend_from_slice(&u32s(&[640 << 16, 360 << 16]));
    full(b"tkhd", 0, flags, &p)
}

pub fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut p = u32s(&[0, 0, timescale, duration]);
    // "und" packed as 5-bit letters
    p.extend_from_slice(&0x55c4u16.to_be_bytes());
    p.extend_from_slice(&[0, 0]);
    full(b"mdhd", 0, 0, &p)
}

pub fn hdlr(handler: &[u8; 4], name: &str) -> Vec<u8> {
    let mut p = vec![0u8; 4];
    p.extend_from_slice(handler);
    p.extend_from_slice(&[0u8; 12]);
    p.extend_from_slice(name.as_bytes());
    p.push(0);
    full(b"hdlr", 0, 0, &p)
}

pub fn elst(entries: &[(u32, i32, i16, i16)]) -> Vec<u8> {
    let mut p = (entries.len() as u32).to_be_bytes().to_vec();
    for &(duration, media_time, rate_int, rate_frac) in entries {
        p.extend_from_slice(&duration.to_be_bytes());
        p.extend_from_slice(&media_time.to_be_bytes());
        p.extend_from_slice(&rate_int.to_be_bytes());
        p.extend_from_slice(&rate_frac.to_be_bytes());
    }
    full(b"elst", 0, 0, &p)
}

pub fn stsc(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut p = (entries.len() as u32).to_be_bytes().to_vec();
    for &(first, per_chunk, desc) in entries {
        p.extend_from_slice(&u32s(&[first, per_chunk, desc]));
    }
    full(b"stsc", 0, 0, &p)
}

pub fn stco(offsets: &[u32]) -> Vec<u8> {
    let mut p = (offsets.len() as u32).to_be_bytes().to_vec();
    p.extend_from_slice(&u32s(offsets));
    full(b"stco", 0, 0, &p)
}

pub fn stsz_constant(size: u32, count: u32) -> Vec<u8> {
    full(b"stsz", 0, 0, &u32s(&[size, count]))
}

pub fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut p = (entries.len() as u32).to_be_bytes().to_vec();
    for &(count, delta) in entries {
        p.extend_from_slice(&u32s(&[count, delta]));
    }
    full(b"stts", 0, 0, &p)
}

/// Visual sample entry: 78 bytes of fixed fields, then `children`.
pub fn visual_entry(format: &[u8; 4], width: u16, height: u16, children: &[u8]) -> Vec<u8> {
    let mut p = vec![0u8; 6];
    p.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    p.extend_from_slice(&[0u8; 16]);
    p.extend_from_slice(&width.to_be_bytes());
    p.extend_from_slice(&height.to_be_bytes());
    p.extend_from_slice(&[0u8; 50]);
    assert_eq!(p.len(), 78);
    p.extend_from_slice(children);
    bx(format, &p)
}

pub fn stsd(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut p = (entries.len() as u32).to_be_bytes().to_vec();
    for e in entries {
        p.extend_from_slice(e);
    }
    full(b"stsd", 0, 0, &p)
}

/// avcC with one SPS and one PPS.
pub fn avcc(length_size: u8) -> Vec<u8> {
    let mut p = vec![1, 0x64, 0x00, 0x1f, 0xfc | (length_size - 1), 0xe1];
    p.extend_from_slice(&4u16.to_be_bytes());
    p.extend_from_slice(&[0x67, 0x64, 0x00, 0x1f]);
    p.push(1);
    p.extend_from_slice(&2u16.to_be_bytes());
    p.extend_from_slice(&[0x68, 0xee]);
    bx(b"avcC", &p)
}

/// A single-track progressive file: ftyp, moov (with the given stbl
/// children), mdat.
pub fn movie_with_stbl(stbl_children: &[Vec<u8>]) -> Vec<u8> {
    let stbl = bx(b"stbl", &cat(stbl_children));
    let minf = bx(b"minf", &stbl);
    let mdia = bx(b"mdia", &cat(&[mdhd(1000, 1000), hdlr(b"vide", "Video"), minf]));
    let trak = bx(b"trak", &cat(&[tkhd(1, 1000, 1), mdia]));
    let moov = bx(b"moov", &cat(&[mvhd(1000, 1000), trak]));
    cat(&[ftyp(), moov, bx(b"mdat", &[0u8; 16])])
}

pub fn tolerant_tree(data: Vec<u8>) -> ParseTree {
    let reader = MemoryReader::new(data);
    ParsePipeline::tolerant()
        .parse_tree(&reader, &ParseContext::new())
        .expect("tolerant parse should not fail")
}

/// Tolerant traversal with every rule enabled.
pub fn full_validation_tree(data: Vec<u8>) -> ParseTree {
    let reader = MemoryReader::new(data);
    let options = ParseOptions {
        abort_on_structural_error: false,
        max_corruption_events: 500,
        ..ParseOptions::default()
    };
    ParsePipeline::new(options)
        .parse_tree(&reader, &ParseContext::new())
        .expect("parse should not fail")
}

pub fn strict_tree(data: Vec<u8>) -> isoinspect::Result<ParseTree> {
    let reader = MemoryReader::new(data);
    ParsePipeline::strict().parse_tree(&reader, &ParseContext::new())
}

pub fn collect_events(data: Vec<u8>, options: ParseOptions) -> Vec<ParseEvent> {
    let reader = MemoryReader::new(data);
    ParsePipeline::new(options)
        .events(&reader, &ParseContext::new())
        .collect::<Result<Vec<_>, _>>()
        .expect("event stream should not fail")
}

pub fn codes(tree: &ParseTree) -> Vec<String> {
    tree.issues.iter().map(|i| i.code.clone()).collect()
}

pub fn issues_with<'a>(tree: &'a ParseTree, code: &str) -> Vec<&'a isoinspect::ParseIssue> {
    tree.issues.iter().filter(|i| i.code == code).collect()
}
