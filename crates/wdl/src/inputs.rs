//! Run input assembly.
//!
//! Inputs come from a Cromwell-style JSON object (file, `-` for stdin, or an
//! inline object), then `key=value` arguments, then `--empty` and `--none`,
//! each layer overriding the previous one. The result is validated against
//! the executable's declarations before anything remote is touched.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::debug;

use crate::{Executable, InputDecl, WdlType};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("unknown input {0}")]
    Unknown(String),

    #[error("missing required inputs for {executable}: {}", .names.join(", "))]
    MissingRequired { executable: String, names: Vec<String> },

    #[error("File/Directory input is not a s3:// URI: {value}")]
    NotS3 { name: String, value: String },

    #[error("invalid {ty} value for {name}: {value}")]
    InvalidValue { name: String, ty: String, value: String },

    #[error("--empty {0}: only String and Array inputs can be set empty")]
    NotEmptiable(String),

    #[error("--none {0}: only optional inputs can be set to None")]
    NotOptional(String),

    #[error("malformed input argument '{0}'; expected key=value")]
    Malformed(String),

    #[error("input JSON must be an object")]
    NotAnObject,

    #[error("failed to read input JSON {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid input JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw input arguments as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct InputArgs {
    /// Input JSON: a file path, `-`, or an inline object.
    pub input_json: Option<String>,
    /// `key=value` arguments; a bare `key=` takes the following argument as
    /// its value.
    pub pairs: Vec<String>,
    pub empty: Vec<String>,
    pub none: Vec<String>,
}

impl InputArgs {
    pub fn is_empty(&self) -> bool {
        self.input_json.is_none() && self.pairs.is_empty() && self.empty.is_empty() && self.none.is_empty()
    }
}

/// Merge every input source and validate the result against `executable`.
pub fn assemble(executable: &Executable, args: &InputArgs) -> Result<Map<String, Value>, InputError> {
    let mut values = Map::new();

    if let Some(raw) = &args.input_json {
        for (key, value) in read_input_json(raw)? {
            let decl = lookup(executable, &key)?;
            values.insert(decl.name.clone(), value);
        }
    }

    let mut from_arguments: HashSet<String> = HashSet::new();
    let mut pairs = args.pairs.iter();
    while let Some(pair) = pairs.next() {
        let (key, value) = pair.split_once('=').ok_or_else(|| InputError::Malformed(pair.clone()))?;
        let value = match value {
            "" => pairs.next().map(String::as_str).unwrap_or_default(),
            value => value,
        };
        let decl = lookup(executable, key.trim())?;
        let first_occurrence = from_arguments.insert(decl.name.clone());
        match &decl.ty {
            WdlType::Array { item, .. } => {
                let element = coerce(&decl.name, item, value)?;
                match values.get_mut(&decl.name) {
                    Some(Value::Array(existing)) if !first_occurrence => existing.push(element),
                    _ => {
                        values.insert(decl.name.clone(), Value::Array(vec![element]));
                    }
                }
            }
            ty => {
                values.insert(decl.name.clone(), coerce(&decl.name, ty, value)?);
            }
        }
    }

    for key in &args.empty {
        let decl = lookup(executable, key)?;
        let empty = match decl.ty {
            WdlType::String => Value::String(String::new()),
            WdlType::Array { .. } => Value::Array(Vec::new()),
            _ => return Err(InputError::NotEmptiable(key.clone())),
        };
        values.insert(decl.name.clone(), empty);
    }

    for key in &args.none {
        let decl = lookup(executable, key)?;
        if !decl.optional {
            return Err(InputError::NotOptional(key.clone()));
        }
        values.insert(decl.name.clone(), Value::Null);
    }

    let missing: Vec<String> = executable
        .required_inputs()
        .into_iter()
        .filter(|name| values.get(*name).is_none_or(Value::is_null))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(InputError::MissingRequired {
            executable: executable.name.clone(),
            names: missing,
        });
    }

    for (name, value) in &values {
        if let Some(decl) = executable.input(name) {
            check_paths(name, &decl.ty, value)?;
        }
    }
    debug!("assembled {} inputs for {}", values.len(), executable.name);
    Ok(values)
}

/// Find a declaration by bare name or `executable.name`.
fn lookup<'e>(executable: &'e Executable, key: &str) -> Result<&'e InputDecl, InputError> {
    let prefix = format!("{}.", executable.name);
    let name = key.strip_prefix(&prefix).unwrap_or(key);
    executable.input(name).ok_or_else(|| InputError::Unknown(key.to_string()))
}

fn read_input_json(raw: &str) -> Result<Map<String, Value>, InputError> {
    let text = if raw == "-" {
        io::read_to_string(io::stdin()).map_err(|source| InputError::Io {
            path: PathBuf::from("-"),
            source,
        })?
    } else if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        let path = Path::new(raw);
        fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?
    };
    match serde_json::from_str(&text)? {
        Value::Object(object) => Ok(object),
        _ => Err(InputError::NotAnObject),
    }
}

fn coerce(name: &str, ty: &WdlType, raw: &str) -> Result<Value, InputError> {
    let invalid = || InputError::InvalidValue {
        name: name.to_string(),
        ty: ty.to_string(),
        value: raw.to_string(),
    };
    match ty {
        WdlType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        WdlType::Int => raw.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
        WdlType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        WdlType::String | WdlType::File | WdlType::Directory => Ok(Value::String(raw.to_string())),
        WdlType::Array { .. } | WdlType::Other(_) => serde_json::from_str(raw).map_err(|_| invalid()),
    }
}

fn check_paths(name: &str, ty: &WdlType, value: &Value) -> Result<(), InputError> {
    match (ty, value) {
        (WdlType::File | WdlType::Directory, Value::String(path)) if !path.starts_with("s3://") => Err(InputError::NotS3 {
            name: name.to_string(),
            value: path.clone(),
        }),
        (WdlType::Array { item, .. }, Value::Array(elements)) => elements.iter().try_for_each(|element| check_paths(name, item, element)),
        _ => Ok(()),
    }
}
