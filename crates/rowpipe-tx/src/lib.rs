//! # Rowpipe Transformations - Row Processing Operators
//!
//! This crate provides the transformer implementations for rowpipe pipelines
//! and the Lua script engine backing the script-based ones.
//!
//! ## Available Transformations
//!
//! ### Value Transformations
//! - **Mask**: Character-by-character masking against a pattern (`#` keeps
//!   the source character, anything else replaces it)
//! - **Overwrite**: Replace a column's value with a literal
//! - **Format**: Add a computed column from a `{COL}`/`{COL:fmt}` template
//! - **Fake**: Replace values with deterministic fake data keyed by
//!   `(seed, row index, column)`
//!
//! ### Script Transformations
//! - **Filter**: Keep rows for which every Lua predicate returns truthy
//! - **Expand**: Replace a row by the array of rows a Lua script returns
//! - **Script**: Generic per-row map written in Lua
//!
//! ## Example Usage
//!
//! ```
//! use rowpipe_core::DataTransformer;
//! use rowpipe_tx::create_transformer;
//!
//! let mask = create_transformer("mask:CARD=####-####-####-####").unwrap();
//! assert_eq!(mask.name(), "mask");
//! ```
//!
//! Transformer specs are `kind:arguments`; see [`create_transformer`].

pub mod lua;
pub mod script;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rowpipe_core::descriptor::{CreateContext, Descriptor, DescriptorKind, Provider};
use rowpipe_core::options::{OptionsInfo, OptionsRegistry};
use rowpipe_core::{
    Column, DataTransformer, LogicalType, PipelineError, Result, Row, RowOutput, Value,
};

pub use lua::LuaScriptEngine;
pub use script::{ExpandTransformer, FilterTransformer, ScriptTransformer};

fn resolve_column(columns: &[Column], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| PipelineError::config(format!("unknown column `{name}` in transformer")))
}

/// Apply a mask pattern to one rendered value: `#` at position `i` keeps
/// `source[i]`, any other pattern character replaces it. A pattern shorter
/// than the source keeps the source tail; excess pattern is ignored.
fn apply_mask(source: &str, pattern: &str) -> String {
    let pattern: Vec<char> = pattern.chars().collect();
    source
        .chars()
        .enumerate()
        .map(|(i, c)| match pattern.get(i) {
            Some('#') | None => c,
            Some(&p) => p,
        })
        .collect()
}

/// Masks configured columns character-by-character.
pub struct MaskTransformer {
    mappings: Vec<(String, String)>,
    skip_null: bool,
    targets: Vec<(usize, String)>,
}

impl MaskTransformer {
    pub fn new(mappings: Vec<(String, String)>, skip_null: bool) -> Self {
        Self {
            mappings,
            skip_null,
            targets: Vec::new(),
        }
    }
}

impl DataTransformer for MaskTransformer {
    fn name(&self) -> &str {
        "mask"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.targets = self
            .mappings
            .iter()
            .map(|(name, pattern)| Ok((resolve_column(columns, name)?, pattern.clone())))
            .collect::<Result<_>>()?;
        Ok(columns.to_vec())
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        for (index, pattern) in &self.targets {
            match &row[*index] {
                None if self.skip_null => {}
                value => {
                    let rendered = value.as_ref().map(Value::render).unwrap_or_default();
                    row[*index] = Some(Value::Str(apply_mask(&rendered, pattern)));
                }
            }
        }
        Ok(RowOutput::Row(row))
    }
}

/// Replaces configured columns with a literal string value.
pub struct OverwriteTransformer {
    mappings: Vec<(String, String)>,
    skip_null: bool,
    targets: Vec<(usize, String)>,
}

impl OverwriteTransformer {
    pub fn new(mappings: Vec<(String, String)>, skip_null: bool) -> Self {
        Self {
            mappings,
            skip_null,
            targets: Vec::new(),
        }
    }
}

impl DataTransformer for OverwriteTransformer {
    fn name(&self) -> &str {
        "overwrite"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.targets = self
            .mappings
            .iter()
            .map(|(name, value)| Ok((resolve_column(columns, name)?, value.clone())))
            .collect::<Result<_>>()?;
        Ok(columns.to_vec())
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        for (index, value) in &self.targets {
            if self.skip_null && row[*index].is_none() {
                continue;
            }
            row[*index] = Some(Value::Str(value.clone()));
        }
        Ok(RowOutput::Row(row))
    }
}

enum Segment {
    Literal(String),
    Field { index: usize, fmt: String },
}

/// Adds (or overwrites) a column computed from a template with `{COL}` or
/// `{COL:fmt}` placeholders. `fmt` is a chrono format string for date and
/// timestamp values, or `.N` for fixed-decimal numerics.
pub struct FormatTransformer {
    mappings: Vec<(String, String)>,
    compiled: Vec<(usize, Vec<Segment>)>,
    width: usize,
}

impl FormatTransformer {
    pub fn new(mappings: Vec<(String, String)>) -> Self {
        Self {
            mappings,
            compiled: Vec::new(),
            width: 0,
        }
    }
}

fn parse_template(template: &str, columns: &[Column]) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            literal.push(c);
            continue;
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        let mut token = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => token.push(c),
                None => {
                    return Err(PipelineError::config(format!(
                        "unclosed placeholder in template `{template}`"
                    )));
                }
            }
        }
        let (name, fmt) = token.split_once(':').unwrap_or((token.as_str(), ""));
        segments.push(Segment::Field {
            index: resolve_column(columns, name)?,
            fmt: fmt.to_string(),
        });
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn format_value(value: Option<&Value>, fmt: &str) -> String {
    let Some(value) = value else {
        return String::new();
    };
    if fmt.is_empty() {
        return value.render();
    }
    match value {
        Value::Date(d) => d.format(fmt).to_string(),
        Value::Timestamp(t) => t.format(fmt).to_string(),
        other => match (fmt.strip_prefix('.'), other.as_f64()) {
            (Some(digits), Some(v)) => {
                let precision = digits.parse::<usize>().unwrap_or(0);
                format!("{v:.precision$}")
            }
            _ => other.render(),
        },
    }
}

impl DataTransformer for FormatTransformer {
    fn name(&self) -> &str {
        "format"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        let mut out = columns.to_vec();
        self.compiled.clear();
        for (name, template) in &self.mappings {
            // Placeholders resolve against the input columns only.
            let segments = parse_template(template, columns)?;
            let index = match out.iter().position(|c| &c.name == name) {
                Some(index) => index,
                None => {
                    out.push(Column::new(name.clone(), LogicalType::String));
                    out.len() - 1
                }
            };
            self.compiled.push((index, segments));
        }
        self.width = out.len();
        Ok(out)
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        row.resize(self.width, None);
        // Render all templates against the incoming values before writing,
        // so a template may overwrite a column it reads.
        let rendered: Vec<(usize, String)> = self
            .compiled
            .iter()
            .map(|(index, segments)| {
                let text: String = segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Literal(s) => s.clone(),
                        Segment::Field { index, fmt } => format_value(row[*index].as_ref(), fmt),
                    })
                    .collect();
                (*index, text)
            })
            .collect();
        for (index, text) in rendered {
            row[index] = Some(Value::Str(text));
        }
        Ok(RowOutput::Row(row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeKind {
    FirstName,
    LastName,
    FullName,
    Email,
    City,
    Int,
    Hex,
}

impl FakeKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "name.first" => Ok(FakeKind::FirstName),
            "name.last" => Ok(FakeKind::LastName),
            "name.full" => Ok(FakeKind::FullName),
            "internet.email" => Ok(FakeKind::Email),
            "address.city" => Ok(FakeKind::City),
            "number.int" => Ok(FakeKind::Int),
            "string.hex" => Ok(FakeKind::Hex),
            other => Err(PipelineError::config(format!(
                "unknown fake category `{other}`"
            ))),
        }
    }
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Edsger", "Grace", "Donald", "Barbara", "John", "Margaret", "Ken", "Dennis",
    "Radia", "Linus", "Frances", "Tim", "Vint", "Hedy",
];

const LAST_NAMES: &[&str] = &[
    "Lovelace", "Turing", "Dijkstra", "Hopper", "Knuth", "Liskov", "Backus", "Hamilton",
    "Thompson", "Ritchie", "Perlman", "Torvalds", "Allen", "Berners-Lee", "Cerf", "Lamarr",
];

const CITIES: &[&str] = &[
    "Lisbon", "Oslo", "Kyoto", "Porto", "Geneva", "Austin", "Dublin", "Zurich", "Vienna",
    "Helsinki", "Toronto", "Seoul", "Bergen", "Leipzig", "Nantes", "Tallinn",
];

const DOMAINS: &[&str] = &["example.com", "example.org", "mail.test", "post.test"];

fn pick<'a>(rng: &mut SmallRng, words: &[&'a str]) -> &'a str {
    words[rng.gen_range(0..words.len())]
}

fn fake_value(kind: FakeKind, rng: &mut SmallRng) -> Value {
    match kind {
        FakeKind::FirstName => Value::Str(pick(rng, FIRST_NAMES).to_string()),
        FakeKind::LastName => Value::Str(pick(rng, LAST_NAMES).to_string()),
        FakeKind::FullName => {
            Value::Str(format!("{} {}", pick(rng, FIRST_NAMES), pick(rng, LAST_NAMES)))
        }
        FakeKind::Email => Value::Str(format!(
            "{}.{}@{}",
            pick(rng, FIRST_NAMES).to_ascii_lowercase(),
            pick(rng, LAST_NAMES).to_ascii_lowercase(),
            pick(rng, DOMAINS)
        )),
        FakeKind::City => Value::Str(pick(rng, CITIES).to_string()),
        FakeKind::Int => Value::Int(rng.gen_range(0..1_000_000)),
        FakeKind::Hex => {
            let mut s = String::with_capacity(16);
            for _ in 0..16 {
                s.push(char::from_digit(rng.gen_range(0..16), 16).unwrap());
            }
            Value::Str(s)
        }
    }
}

/// Stable seed fold over `(seed, row index, column name)`.
fn fold_seed(seed: u64, row_index: u64, column: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in seed
        .to_le_bytes()
        .into_iter()
        .chain(row_index.to_le_bytes())
        .chain(column.bytes())
    {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Replaces configured columns with deterministic pseudo-random fake values.
/// The same seed reproduces byte-identical output across runs.
pub struct FakeTransformer {
    mappings: Vec<(String, String)>,
    seed: u64,
    skip_null: bool,
    targets: Vec<(usize, String, FakeKind)>,
    row_index: u64,
}

impl FakeTransformer {
    pub fn new(mappings: Vec<(String, String)>, seed: u64, skip_null: bool) -> Self {
        Self {
            mappings,
            seed,
            skip_null,
            targets: Vec::new(),
            row_index: 0,
        }
    }
}

impl DataTransformer for FakeTransformer {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.targets = self
            .mappings
            .iter()
            .map(|(name, kind)| {
                Ok((
                    resolve_column(columns, name)?,
                    name.clone(),
                    FakeKind::parse(kind)?,
                ))
            })
            .collect::<Result<_>>()?;
        Ok(columns.to_vec())
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        self.row_index += 1;
        for (index, name, kind) in &self.targets {
            if self.skip_null && row[*index].is_none() {
                continue;
            }
            let mut rng = SmallRng::seed_from_u64(fold_seed(self.seed, self.row_index, name));
            row[*index] = Some(fake_value(*kind, &mut rng));
        }
        Ok(RowOutput::Row(row))
    }
}

/// Parse `COL=value` mappings with the optional `skip_null=`/`seed=` flags.
fn parse_mappings(rest: &str) -> Result<(Vec<(String, String)>, Option<bool>, u64)> {
    let mut mappings = Vec::new();
    let mut skip_null = None;
    let mut seed = 0u64;
    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            PipelineError::config(format!("expected COLUMN=VALUE in transformer spec, got `{part}`"))
        })?;
        match key {
            "skip_null" => {
                skip_null = Some(rowpipe_core::options::parse_bool(key, value)?);
            }
            "seed" => {
                seed = value.parse().map_err(|_| {
                    PipelineError::config(format!("invalid seed `{value}` in transformer spec"))
                })?;
            }
            _ => mappings.push((key.to_string(), value.to_string())),
        }
    }
    if mappings.is_empty() {
        return Err(PipelineError::config("transformer spec names no columns"));
    }
    Ok((mappings, skip_null, seed))
}

/// Split an expand spec into its declared extra columns and the script. A
/// leading `+Tag,Flag:` declares columns the script's rows add to the
/// schema; without it the script may only fill existing columns.
fn parse_expand_spec(rest: &str) -> Result<(Vec<String>, String)> {
    let Some(declaration) = rest.strip_prefix('+') else {
        return Ok((Vec::new(), rest.to_string()));
    };
    let (names, script) = declaration.split_once(':').ok_or_else(|| {
        PipelineError::config(format!(
            "expand spec with a column declaration needs `+COLUMNS:script`, got `{rest}`"
        ))
    })?;
    let columns: Vec<String> = names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if columns.is_empty() {
        return Err(PipelineError::config(
            "expand column declaration names no columns",
        ));
    }
    Ok((columns, script.to_string()))
}

/// Build one transformer from a `kind:arguments` spec string:
///
/// - `mask:CARD=####-####-####-####` (optional `,skip_null=false`)
/// - `overwrite:CITY=Paris,skip_null=true` (alias `static:`)
/// - `format:LABEL={NAME} ({SCORE:.1})`
/// - `fake:EMAIL=internet.email,seed=42`
/// - `filter:return row.Age > 18`
/// - `expand:+Tag:return {{Id=row.Id, Tag='a'}, {Id=row.Id, Tag='b'}}`
/// - `script:return {Age=row.Age + 1}`
pub fn create_transformer(spec: &str) -> Result<Box<dyn DataTransformer>> {
    let (kind, rest) = spec.split_once(':').ok_or_else(|| {
        PipelineError::config(format!("transformer spec `{spec}` is missing `kind:`"))
    })?;
    match kind {
        "mask" => {
            let (mappings, skip_null, _) = parse_mappings(rest)?;
            // Masking a null has no characters to keep; skip them unless
            // explicitly asked not to.
            Ok(Box::new(MaskTransformer::new(mappings, skip_null.unwrap_or(true))))
        }
        "overwrite" | "static" => {
            let (mappings, skip_null, _) = parse_mappings(rest)?;
            Ok(Box::new(OverwriteTransformer::new(mappings, skip_null.unwrap_or(false))))
        }
        "format" => {
            let (mappings, _, _) = parse_mappings(rest)?;
            Ok(Box::new(FormatTransformer::new(mappings)))
        }
        "fake" => {
            let (mappings, skip_null, seed) = parse_mappings(rest)?;
            for (_, kind) in &mappings {
                FakeKind::parse(kind)?;
            }
            Ok(Box::new(FakeTransformer::new(mappings, seed, skip_null.unwrap_or(false))))
        }
        "filter" => Ok(Box::new(FilterTransformer::new(
            Box::new(LuaScriptEngine::new()),
            vec![rest.to_string()],
        ))),
        "expand" => {
            let (extra_columns, script) = parse_expand_spec(rest)?;
            Ok(Box::new(ExpandTransformer::new(
                Box::new(LuaScriptEngine::new()),
                script,
                extra_columns,
            )))
        }
        "script" => Ok(Box::new(ScriptTransformer::new(
            Box::new(LuaScriptEngine::new()),
            rest.to_string(),
        ))),
        other => Err(PipelineError::config(format!("unknown transformer `{other}`"))),
    }
}

/// Build an ordered transformer list; declaration order is preserved.
pub fn create_transformers(specs: &[String]) -> Result<Vec<Box<dyn DataTransformer>>> {
    specs.iter().map(|s| create_transformer(s)).collect()
}

fn create_from_spec(ctx: &CreateContext<'_>) -> Result<Provider> {
    Ok(Provider::Transformer(create_transformer(
        ctx.connection_string,
    )?))
}

fn no_options(_: &OptionsRegistry, field: &str, _: &str) -> Result<()> {
    Err(PipelineError::config(format!("unknown option field {field}")))
}

fn accepts_mask(s: &str) -> bool {
    s.starts_with("mask:")
}
fn accepts_overwrite(s: &str) -> bool {
    s.starts_with("overwrite:") || s.starts_with("static:")
}
fn accepts_format(s: &str) -> bool {
    s.starts_with("format:")
}
fn accepts_fake(s: &str) -> bool {
    s.starts_with("fake:")
}
fn accepts_filter(s: &str) -> bool {
    s.starts_with("filter:")
}
fn accepts_expand(s: &str) -> bool {
    s.starts_with("expand:")
}
fn accepts_script(s: &str) -> bool {
    s.starts_with("script:")
}

/// Transformer descriptors, matching on the `kind:` prefix of a spec string.
pub fn descriptors() -> Vec<Descriptor> {
    let entries: [(&'static str, fn(&str) -> bool); 7] = [
        ("mask", accepts_mask),
        ("overwrite", accepts_overwrite),
        ("format", accepts_format),
        ("fake", accepts_fake),
        ("filter", accepts_filter),
        ("expand", accepts_expand),
        ("script", accepts_script),
    ];
    entries
        .into_iter()
        .map(|(name, accepts)| Descriptor {
            kind: DescriptorKind::Transformer,
            name,
            requires_query: false,
            options: OptionsInfo {
                prefix: name,
                display_name: name,
                fields: &[],
            },
            accepts,
            factory: create_from_spec,
            apply_option: no_options,
        })
        .collect()
}
