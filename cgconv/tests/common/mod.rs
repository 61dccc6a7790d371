//! Shared helpers: an in-memory resolver and a callgrind decoder
#![allow(dead_code)]

use cgconv::domain::ResolverError;
use cgconv::symbolization::{AddressResolver, ImageResolver, InlineFrame, Resolution, SourceLine};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Resolver backed by a table of `(image, address) -> resolution`
#[derive(Default)]
pub struct FakeResolver {
    lines: HashMap<String, HashMap<u64, Resolution>>,
    /// Every `open_image` call, in order
    pub opened: Rc<RefCell<Vec<String>>>,
}

impl FakeResolver {
    pub fn line(mut self, image: &str, address: u64, file: &str, line: u32) -> Self {
        self.set(image, address, resolved(file, line, Vec::new()));
        self
    }

    pub fn set(&mut self, image: &str, address: u64, resolution: Resolution) {
        self.lines.entry(image.to_string()).or_default().insert(address, resolution);
    }
}

pub fn resolved(file: &str, line: u32, inlined_by: Vec<InlineFrame>) -> Resolution {
    Resolution::Resolved { location: SourceLine { file: file.to_string(), line }, inlined_by }
}

pub struct FakeImage(HashMap<u64, Resolution>);

impl ImageResolver for FakeImage {
    fn resolve(&self, address: u64) -> Resolution {
        self.0.get(&address).cloned().unwrap_or(Resolution::Unresolved)
    }
}

impl AddressResolver for FakeResolver {
    type Image = FakeImage;

    fn open_image(&mut self, image: &str) -> Result<FakeImage, ResolverError> {
        self.opened.borrow_mut().push(image.to_string());
        self.lines
            .get(image)
            .cloned()
            .map(FakeImage)
            .ok_or_else(|| ResolverError::NotFound(PathBuf::from(image)))
    }
}

/// One cost line with positions made absolute again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostLine {
    pub object: String,
    pub function: String,
    pub file: String,
    pub address: u64,
    pub line: i64,
    pub counts: Vec<u64>,
}

/// A decoded callgrind file
#[derive(Debug, Default)]
pub struct Decoded {
    pub positions: String,
    pub events: Vec<String>,
    pub lines: Vec<CostLine>,
}

impl Decoded {
    pub fn totals(&self) -> Vec<u64> {
        let mut totals = vec![0; self.events.len()];
        for line in &self.lines {
            for (total, count) in totals.iter_mut().zip(&line.counts) {
                *total += count;
            }
        }
        totals
    }

    /// Cost lines of one function, markers included
    pub fn function(&self, name: &str) -> Vec<&CostLine> {
        self.lines.iter().filter(|l| l.function == name).collect()
    }
}

fn absolute(token: &str, previous: i64) -> i64 {
    if let Some(delta) = token.strip_prefix('+') {
        previous + delta.parse::<i64>().expect("bad delta")
    } else if token.starts_with('-') {
        previous + token.parse::<i64>().expect("bad delta")
    } else if let Some(hex) = token.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).expect("bad address")
    } else {
        token.parse().expect("bad absolute position")
    }
}

/// Decode the subset of the callgrind format cgconv writes
pub fn decode(text: &str) -> Decoded {
    let mut decoded = Decoded::default();
    let (mut object, mut function, mut file) = (String::new(), String::new(), String::new());
    let (mut address, mut line) = (0i64, 0i64);

    for raw in text.lines() {
        if raw.is_empty() {
            continue;
        }
        if let Some(rest) = raw.strip_prefix("positions: ") {
            decoded.positions = rest.to_string();
        } else if let Some(rest) = raw.strip_prefix("events:") {
            decoded.events = rest.split_whitespace().map(str::to_string).collect();
        } else if let Some(rest) = raw.strip_prefix("ob=") {
            object = rest.to_string();
        } else if let Some(rest) = raw.strip_prefix("fn=") {
            function = rest.to_string();
        } else if let Some(rest) = raw.strip_prefix("fl=") {
            file = rest.to_string();
        } else {
            let mut tokens = raw.split_whitespace();
            address = absolute(tokens.next().expect("no address"), address);
            line = absolute(tokens.next().expect("no line"), line);
            let counts: Vec<u64> = tokens.map(|t| t.parse().expect("bad count")).collect();
            assert_eq!(
                counts.len(),
                decoded.events.len(),
                "cost line '{raw}' does not match the declared events"
            );
            decoded.lines.push(CostLine {
                object: object.clone(),
                function: function.clone(),
                file: file.clone(),
                address: u64::try_from(address).expect("negative address"),
                line,
                counts,
            });
        }
    }
    decoded
}
