//! Allocation trace files.
//!
//! A trace starts with four integers: the suggested heap size, the number of
//! distinct block ids, the number of operations and a weight. Each following
//! line is one operation:
//!
//! ```text
//! a <id> <bytes>    allocate
//! r <id> <bytes>    reallocate
//! f <id>            free
//! ```

use std::{num::ParseIntError, str::FromStr};

use snafu::{Location, OptionExt as _, ResultExt as _, Snafu, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc { id: usize, size: usize },
    Realloc { id: usize, size: usize },
    Free { id: usize },
}

impl Op {
    pub fn id(self) -> usize {
        match self {
            Self::Alloc { id, .. } | Self::Realloc { id, .. } | Self::Free { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub suggested_heap_size: usize,
    pub num_ids: usize,
    pub weight: usize,
    pub ops: Vec<Op>,
}

#[derive(Debug, Snafu)]
pub enum ParseError {
    #[snafu(display("trace header is missing the {field}"))]
    MissingHeader {
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: invalid number {token:?}"))]
    InvalidNumber {
        line: usize,
        token: String,
        source: ParseIntError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: unknown operation {op:?}"))]
    UnknownOp {
        line: usize,
        op: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: missing {field}"))]
    MissingField {
        line: usize,
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: unexpected trailing input {token:?}"))]
    TrailingInput {
        line: usize,
        token: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: id {id} is out of range, the trace declares {num_ids} ids"))]
    IdOutOfRange {
        line: usize,
        id: usize,
        num_ids: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("trace declares {declared} operations but contains {found}"))]
    OpCountMismatch {
        declared: usize,
        found: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl FromStr for Trace {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s
            .lines()
            .enumerate()
            .map(|(index, text)| (index + 1, text))
            .filter(|(_, text)| !text.trim().is_empty());

        let mut header = [0; 4];
        let mut filled = 0;
        while filled < header.len() {
            let field = HEADER_FIELDS[filled];
            let (line, text) = lines.next().context(MissingHeaderSnafu { field })?;
            for token in text.split_whitespace() {
                let slot = header
                    .get_mut(filled)
                    .context(TrailingInputSnafu { line, token })?;
                *slot = parse_number(line, token)?;
                filled += 1;
            }
        }

        let [suggested_heap_size, num_ids, declared, weight] = header;
        let ops = lines
            .map(|(line, text)| parse_op(line, text, num_ids))
            .collect::<Result<Vec<_>, _>>()?;
        ensure!(
            ops.len() == declared,
            OpCountMismatchSnafu {
                declared,
                found: ops.len(),
            }
        );

        Ok(Self {
            suggested_heap_size,
            num_ids,
            weight,
            ops,
        })
    }
}

const HEADER_FIELDS: [&str; 4] = ["heap size", "id count", "operation count", "weight"];

fn parse_number(line: usize, token: &str) -> Result<usize, ParseError> {
    token.parse().context(InvalidNumberSnafu { line, token })
}

fn parse_op(line: usize, text: &str, num_ids: usize) -> Result<Op, ParseError> {
    let mut fields = text.split_whitespace();
    let kind = fields.next().context(MissingFieldSnafu {
        line,
        field: "operation",
    })?;
    let mut number = |field: &'static str| {
        let token = fields.next().context(MissingFieldSnafu { line, field })?;
        parse_number(line, token)
    };

    let op = match kind {
        "a" => Op::Alloc {
            id: number("id")?,
            size: number("size")?,
        },
        "r" => Op::Realloc {
            id: number("id")?,
            size: number("size")?,
        },
        "f" => Op::Free { id: number("id")? },
        _ => return UnknownOpSnafu { line, op: kind }.fail(),
    };
    if let Some(token) = fields.next() {
        return TrailingInputSnafu { line, token }.fail();
    }

    let id = op.id();
    ensure!(id < num_ids, IdOutOfRangeSnafu { line, id, num_ids });
    Ok(op)
}
