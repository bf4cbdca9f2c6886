//! Line/column <-> offset conversion.
//!
//! Editor positions are one-indexed `(line, column)` pairs; offsets are
//! zero-indexed counts of UTF-16 code units from the start of the file, which
//! is the unit the analysis engine reports. Every line owns the offsets from
//! its start up to and including its terminator, so the mapping is a
//! bijection over `[0, len]`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::engine::{AnalysisEngine, EngineError};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("File is not part of the project: {0}")]
    NotFound(PathBuf),

    #[error("Position {line}:{column} is outside {path}")]
    PositionOutOfRange {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    #[error("Offset {offset} is outside {path}")]
    OffsetOutOfRange { path: PathBuf, offset: usize },

    #[error(transparent)]
    Engine(EngineError),
}

impl From<EngineError> for CodecError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FileNotFound(path) => Self::NotFound(path),
            other => Self::Engine(other),
        }
    }
}

/// One-indexed editor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Line start table in UTF-16 code units.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        let mut unit = 0;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            unit += ch.len_utf16();
            match ch {
                '\n' => starts.push(unit),
                // CRLF breaks on the '\n'; a lone CR is a terminator of its own
                '\r' if chars.peek() != Some(&'\n') => starts.push(unit),
                _ => {}
            }
        }

        Self { starts, len: unit }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Total length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Offset of the first unit of `line` (one-indexed).
    pub fn line_start(&self, line: usize) -> Option<usize> {
        line.checked_sub(1).and_then(|i| self.starts.get(i)).copied()
    }

    /// Last valid offset on `line`, terminator included.
    fn line_limit(&self, line: usize) -> usize {
        match self.starts.get(line) {
            Some(next) => next - 1,
            None => self.len,
        }
    }

    pub fn offset(&self, line: usize, column: usize) -> Option<usize> {
        if column == 0 {
            return None;
        }
        let start = self.line_start(line)?;
        let offset = start + column - 1;
        (offset <= self.line_limit(line)).then_some(offset)
    }

    pub fn position(&self, offset: usize) -> Option<Position> {
        if offset > self.len {
            return None;
        }
        let line = self.starts.partition_point(|&start| start <= offset);
        Some(Position::new(line, offset - self.starts[line - 1] + 1))
    }

    /// UTF-16 range of `line`'s content, terminator excluded.
    fn content_range(&self, line: usize, text: &str, offsets: &OffsetMap) -> Option<(usize, usize)> {
        let start = self.line_start(line)?;
        let end = match self.starts.get(line) {
            Some(&next) => next,
            None => self.len,
        };
        let bytes = offsets.to_byte(start)?..offsets.to_byte(end)?;
        let content = text[bytes].trim_end_matches(['\n', '\r']);
        Some((start, start + content.encode_utf16().count()))
    }
}

/// UTF-16 <-> UTF-8 byte offset conversion for one text.
#[derive(Debug, Clone)]
pub struct OffsetMap {
    bytes: Vec<usize>,
    units: Vec<usize>,
}

impl OffsetMap {
    pub fn new(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        let mut units = Vec::with_capacity(text.len() + 1);
        let mut unit = 0;

        for (byte, ch) in text.char_indices() {
            bytes.push(byte);
            units.push(unit);
            unit += ch.len_utf16();
        }
        bytes.push(text.len());
        units.push(unit);

        Self { bytes, units }
    }

    pub fn len_utf16(&self) -> usize {
        self.units.last().copied().unwrap_or(0)
    }

    /// Byte offset to UTF-16 offset. A byte inside a character maps to the
    /// character's start.
    pub fn to_utf16(&self, byte: usize) -> usize {
        match self.bytes.binary_search(&byte) {
            Ok(i) => self.units[i],
            Err(0) => 0,
            Err(i) => self.units[i - 1],
        }
    }

    /// UTF-16 offset to byte offset. An offset between the halves of a
    /// surrogate pair maps to the character's start.
    pub fn to_byte(&self, unit: usize) -> Option<usize> {
        if unit > self.len_utf16() {
            return None;
        }
        Some(match self.units.binary_search(&unit) {
            Ok(i) => self.bytes[i],
            Err(0) => 0,
            Err(i) => self.bytes[i - 1],
        })
    }
}

/// Tables for one file's text as seen by the engine.
pub struct FileTable {
    pub text: Arc<str>,
    pub lines: LineIndex,
    pub offsets: OffsetMap,
}

impl FileTable {
    pub fn new(text: Arc<str>) -> Self {
        let lines = LineIndex::new(&text);
        let offsets = OffsetMap::new(&text);
        Self {
            text,
            lines,
            offsets,
        }
    }

    /// Text between two UTF-16 offsets.
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        let start = self.offsets.to_byte(start)?;
        let end = self.offsets.to_byte(end)?;
        self.text.get(start..end.max(start))
    }

    /// Text of `line` without its terminator.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        let (start, end) = self.lines.content_range(line, &self.text, &self.offsets)?;
        self.slice(start, end)
    }
}

/// Request-scoped position codec over an engine handle.
///
/// Each file's line table is built once per codec from the engine's current
/// text, so converting many occurrences in the same file scans it once.
pub struct PositionCodec<'a> {
    engine: &'a dyn AnalysisEngine,
    tables: HashMap<PathBuf, Arc<FileTable>>,
}

impl<'a> PositionCodec<'a> {
    pub fn new(engine: &'a dyn AnalysisEngine) -> Self {
        Self {
            engine,
            tables: HashMap::new(),
        }
    }

    pub async fn table(&mut self, file: &Path) -> Result<Arc<FileTable>, CodecError> {
        if let Some(table) = self.tables.get(file) {
            return Ok(table.clone());
        }
        let text = self.engine.current_text(file).await?;
        let table = Arc::new(FileTable::new(text));
        self.tables.insert(file.to_path_buf(), table.clone());
        Ok(table)
    }

    pub async fn offset_of(
        &mut self,
        file: &Path,
        line: usize,
        column: usize,
    ) -> Result<usize, CodecError> {
        let table = self.table(file).await?;
        table
            .lines
            .offset(line, column)
            .ok_or_else(|| CodecError::PositionOutOfRange {
                path: file.to_path_buf(),
                line,
                column,
            })
    }

    pub async fn position_of(&mut self, file: &Path, offset: usize) -> Result<Position, CodecError> {
        let table = self.table(file).await?;
        table
            .lines
            .position(offset)
            .ok_or_else(|| CodecError::OffsetOutOfRange {
                path: file.to_path_buf(),
                offset,
            })
    }

    /// Trimmed text of `line`, empty when the line does not exist.
    pub async fn preview(&mut self, file: &Path, line: usize) -> Result<String, CodecError> {
        let table = self.table(file).await?;
        Ok(table
            .line_text(line)
            .map(|text| text.trim().to_string())
            .unwrap_or_default())
    }

    pub async fn text_between(
        &mut self,
        file: &Path,
        start: usize,
        end: usize,
    ) -> Result<String, CodecError> {
        let table = self.table(file).await?;
        table
            .slice(start, end)
            .map(str::to_string)
            .ok_or_else(|| CodecError::OffsetOutOfRange {
                path: file.to_path_buf(),
                offset: end,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::testing::ScriptedEngine;

    fn assert_round_trips(text: &str) {
        let index = LineIndex::new(text);
        let len = text.encode_utf16().count();
        assert_eq!(index.len(), len);

        for offset in 0..=len {
            let pos = index.position(offset).unwrap();
            assert_eq!(index.offset(pos.line, pos.column), Some(offset), "offset {offset}");
        }

        for line in 1..=index.line_count() {
            let mut column = 1;
            while let Some(offset) = index.offset(line, column) {
                assert_eq!(index.position(offset), Some(Position::new(line, column)));
                column += 1;
            }
            assert!(column > 1, "line {line} has no valid column");
        }
    }

    #[test]
    fn test_round_trip_ascii() {
        assert_round_trips("const foo = 1;\nconst bar = foo;\nconsole.log(foo);");
        assert_round_trips("");
        assert_round_trips("\n\n");
    }

    #[test]
    fn test_round_trip_astral_and_multibyte() {
        assert_round_trips("const s = \"😀 héllo\";\nlet 名前 = s;\n// 𝕏\n");
    }

    #[test]
    fn test_round_trip_crlf() {
        assert_round_trips("const a = 1;\r\nconst b = a;\r\n\r\nb;");
        assert_round_trips("lone\rcarriage\r\nmixed\n");
    }

    #[test]
    fn test_positions_count_utf16_units() {
        let text = "let s = \"😀\"; let t = s;";
        let index = LineIndex::new(text);
        let t_byte = text.find(" t ").unwrap() + 1;
        let t_unit = text[..t_byte].encode_utf16().count();
        // the emoji is four bytes, two units and one char
        assert_eq!(t_unit, t_byte - 2);
        assert_eq!(text[..t_byte].chars().count(), t_unit - 1);
        assert_eq!(index.position(t_unit), Some(Position::new(1, t_unit + 1)));
    }

    #[test]
    fn test_crlf_lines() {
        let index = LineIndex::new("ab\r\ncd");
        assert_eq!(index.line_count(), 2);
        assert_eq!(index.offset(2, 1), Some(4));
        assert_eq!(index.position(4), Some(Position::new(2, 1)));
        // the terminator belongs to line 1
        assert_eq!(index.position(2), Some(Position::new(1, 3)));
        assert_eq!(index.position(3), Some(Position::new(1, 4)));
    }

    #[test]
    fn test_out_of_range() {
        let index = LineIndex::new("abc\nde");
        assert_eq!(index.offset(0, 1), None);
        assert_eq!(index.offset(1, 0), None);
        assert_eq!(index.offset(3, 1), None);
        assert_eq!(index.offset(1, 6), None);
        assert_eq!(index.offset(2, 3), Some(6));
        assert_eq!(index.offset(2, 4), None);
        assert_eq!(index.position(7), None);
    }

    #[test]
    fn test_offset_map() {
        let text = "a😀b名";
        let map = OffsetMap::new(text);
        assert_eq!(map.len_utf16(), 5);
        assert_eq!(map.to_byte(0), Some(0));
        assert_eq!(map.to_byte(1), Some(1));
        assert_eq!(map.to_byte(2), Some(1));
        assert_eq!(map.to_byte(3), Some(5));
        assert_eq!(map.to_byte(4), Some(6));
        assert_eq!(map.to_byte(5), Some(9));
        assert_eq!(map.to_byte(6), None);
        assert_eq!(map.to_utf16(5), 3);
        assert_eq!(map.to_utf16(9), 5);
        assert_eq!(map.to_utf16(2), 1);
    }

    #[test]
    fn test_file_table_line_text_and_slice() {
        let table = FileTable::new(Arc::from("  const x = 1;  \r\nlet 😀y = x;\n"));
        assert_eq!(table.line_text(1), Some("  const x = 1;  "));
        assert_eq!(table.line_text(2), Some("let 😀y = x;"));
        assert_eq!(table.line_text(3), Some(""));
        assert_eq!(table.line_text(4), None);
        let start = table.lines.offset(2, 7).unwrap();
        assert_eq!(table.slice(start, start + 1), Some("y"));
    }

    #[tokio::test]
    async fn test_codec_reports_unknown_file() {
        let engine = ScriptedEngine::default();
        let mut codec = PositionCodec::new(&engine);
        let path = Path::new("/x/a.ts");

        let err = codec.offset_of(path, 1, 1).await.unwrap_err();
        assert!(matches!(&err, CodecError::NotFound(p) if p == path));
        assert_eq!(err.to_string(), "File is not part of the project: /x/a.ts");
        assert!(matches!(
            codec.preview(path, 1).await,
            Err(CodecError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_codec_caches_tables_per_file() {
        let path = PathBuf::from("/x/a.ts");
        let mut engine = ScriptedEngine::default();
        engine.texts.insert(path.clone(), Arc::from("let a;
let bb;"));
        let mut codec = PositionCodec::new(&engine);

        assert_eq!(codec.offset_of(&path, 2, 5).await.unwrap(), 11);
        assert_eq!(codec.position_of(&path, 11).await.unwrap(), Position::new(2, 5));
        assert_eq!(codec.text_between(&path, 11, 13).await.unwrap(), "bb");
        assert!(Arc::ptr_eq(
            &codec.table(&path).await.unwrap(),
            &codec.table(&path).await.unwrap()
        ));
    }
}
