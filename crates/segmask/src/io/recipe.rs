//! Reader for XML mask recipes.
//!
//! A recipe holds any number of `RecipeType_Mask` elements. Each carries an
//! optional `Guid` and one or more `Mask` nodes with a bounding box origin
//! (`p_nBoundTop`, `p_nBoundLeft`) and `RecipeType_PointLine` scanlines
//! (`StartPoint/X`, `StartPoint/Y`, `Length`).
//!
//! Field values are kept as text until decode time so that one malformed
//! entry can be skipped without losing the rest of the file.

use std::{fs, path::Path};

use quick_xml::{Reader, events::Event};
use tracing::debug;

use crate::{
    algorithms::{RecipeEntry, RecipeMaskNode, Scanline},
    error::{Result, SegmaskError},
    traits::RecipeSource,
};

const ENTRY_TAG: &str = "RecipeType_Mask";
const NODE_TAG: &str = "Mask";
const LINE_TAG: &str = "RecipeType_PointLine";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScanline {
    pub x: Option<String>,
    pub y: Option<String>,
    pub length: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMaskNode {
    pub bound_top: Option<String>,
    pub bound_left: Option<String>,
    pub scanlines: Vec<RawScanline>,
}

/// One `RecipeType_Mask` element with its fields still as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecipeEntry {
    pub guid: Option<String>,
    pub nodes: Vec<RawMaskNode>,
}

fn parse_field(value: &Option<String>, field: &str) -> Result<i32> {
    let text = value
        .as_deref()
        .ok_or_else(|| SegmaskError::MalformedRecipe(format!("missing {field}")))?;
    text.trim().parse::<i32>().map_err(|_| {
        SegmaskError::MalformedRecipe(format!("{field}: '{text}' is not an integer"))
    })
}

impl RecipeSource for RawRecipeEntry {
    fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    fn to_entry(&self) -> Result<RecipeEntry> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let scanlines = node
                    .scanlines
                    .iter()
                    .map(|line| {
                        Ok(Scanline {
                            x: parse_field(&line.x, "StartPoint.X")?,
                            y: parse_field(&line.y, "StartPoint.Y")?,
                            length: parse_field(&line.length, "Length")?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(RecipeMaskNode {
                    bound_top: parse_field(&node.bound_top, "p_nBoundTop")?,
                    bound_left: parse_field(&node.bound_left, "p_nBoundLeft")?,
                    scanlines,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RecipeEntry {
            guid: self.guid.clone(),
            nodes,
        })
    }
}

/// Read and parse a recipe file
pub fn read_recipe_file<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecipeEntry>> {
    let content = fs::read_to_string(path)?;
    parse_recipe_xml(&content)
}

/// Parse recipe XML into raw entries.
///
/// Only document-level XML errors fail the whole parse. Missing or
/// non-numeric fields surface later, per entry.
pub fn parse_recipe_xml(xml: &str) -> Result<Vec<RawRecipeEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut entry: Option<RawRecipeEntry> = None;
    let mut node: Option<RawMaskNode> = None;
    let mut line: Option<RawScanline> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    ENTRY_TAG => entry = Some(RawRecipeEntry::default()),
                    NODE_TAG if entry.is_some() => node = Some(RawMaskNode::default()),
                    LINE_TAG if node.is_some() => line = Some(RawScanline::default()),
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(ref e) => {
                if e.name().as_ref() == ENTRY_TAG.as_bytes() {
                    entries.push(RawRecipeEntry::default());
                }
            }
            Event::Text(ref e) => {
                let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                let tag = stack.last().map(String::as_str);
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .and_then(|i| stack.get(i))
                    .map(String::as_str);

                match (tag, parent) {
                    (Some("Guid"), Some(ENTRY_TAG)) => {
                        if let Some(entry) = entry.as_mut() {
                            entry.guid = Some(text);
                        }
                    }
                    (Some("p_nBoundTop"), Some(NODE_TAG)) => {
                        if let Some(node) = node.as_mut() {
                            node.bound_top = Some(text);
                        }
                    }
                    (Some("p_nBoundLeft"), Some(NODE_TAG)) => {
                        if let Some(node) = node.as_mut() {
                            node.bound_left = Some(text);
                        }
                    }
                    (Some("X"), Some("StartPoint")) => {
                        if let Some(line) = line.as_mut() {
                            line.x = Some(text);
                        }
                    }
                    (Some("Y"), Some("StartPoint")) => {
                        if let Some(line) = line.as_mut() {
                            line.y = Some(text);
                        }
                    }
                    (Some("Length"), Some(LINE_TAG)) => {
                        if let Some(line) = line.as_mut() {
                            line.length = Some(text);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.pop();
                match name.as_str() {
                    LINE_TAG => {
                        if let (Some(finished), Some(node)) = (line.take(), node.as_mut()) {
                            node.scanlines.push(finished);
                        }
                    }
                    NODE_TAG => {
                        if let (Some(finished), Some(entry)) = (node.take(), entry.as_mut()) {
                            entry.nodes.push(finished);
                        }
                    }
                    ENTRY_TAG => {
                        if let Some(finished) = entry.take() {
                            entries.push(finished);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    debug!(entries = entries.len(), "recipe parsed");
    Ok(entries)
}
