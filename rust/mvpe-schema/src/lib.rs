//! Schema model, YAML front-end, and validation (component C5, model half).
//!
//! Parses the IDL described in `SPEC_FULL.md` section 6.2, validates it
//! syntactically (section 4.5.2), and drives [`mvpe_ids`] to stamp stable
//! numeric ids onto services, methods, and messages (section 4.4.7). The
//! validated, id-assigned [`Schema`] is the input to `mvpe-codegen`.

use std::collections::HashSet;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

use mvpe_ids::{IdAllocator, IdError};

/// The closed set of supported field types (section 4.5.2), matched
/// case-insensitively against the IDL's `type:` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTypeName {
    String,
    Int32,
    Int64,
    Boolean,
    Float,
    Double,
    Bytes,
}

impl FieldTypeName {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.to_ascii_lowercase().as_str() {
            "string" => FieldTypeName::String,
            "int32" | "i32" => FieldTypeName::Int32,
            "int64" | "i64" => FieldTypeName::Int64,
            "boolean" | "bool" => FieldTypeName::Boolean,
            "float" | "f32" => FieldTypeName::Float,
            "double" | "f64" => FieldTypeName::Double,
            "bytes" => FieldTypeName::Bytes,
            _ => return None,
        })
    }
}

/// Raw YAML shape (section 6.2). Deserialized as-is, then lowered into the
/// validated [`Schema`] model by [`Schema::from_yaml`].
#[derive(Debug, Deserialize)]
struct RawSchema {
    service: String,
    #[serde(default)]
    id: Option<u16>,
    #[serde(default)]
    methods: Vec<RawMethod>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    name: String,
    #[serde(default)]
    id: Option<u16>,
    request: String,
    response: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    name: String,
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
}

/// A validated field within a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldTypeName,
    pub optional: bool,
    pub default: Option<serde_yaml::Value>,
}

/// A validated message definition, id-assigned once [`Schema::assign_ids`]
/// has run.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub name: String,
    pub id: Option<u16>,
    pub fields: Vec<Field>,
}

/// A validated method definition within a [`Service`].
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub id: Option<u16>,
    pub request: String,
    pub response: String,
}

/// A validated, not-yet-id-assigned (or id-assigned, after
/// [`Schema::assign_ids`]) service definition (section 3).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub service: String,
    pub service_id: Option<u16>,
    pub methods: Vec<Method>,
    pub messages: Vec<Message>,
}

/// Context attached to a [`SchemaError`] naming where in the schema source
/// the problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(pub String);

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced while parsing and validating a schema (section 7
/// `SchemaError` taxonomy), modeled as `thiserror` + `miette::Diagnostic`
/// variants so multi-issue batches (section 7 "multi-issue batches
/// preferred over fail-fast") render as actionable diagnostics.
#[derive(Error, Debug, Diagnostic, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid schema: {errors:?}")]
    #[diagnostic(code(mvpe::schema::invalid))]
    InvalidSchema {
        #[related]
        errors: Vec<SchemaError>,
    },

    #[error("failed to parse YAML: {details}")]
    #[diagnostic(code(mvpe::schema::yaml_parse))]
    YamlParseError { details: String },

    #[error("missing required field at `{path}`")]
    #[diagnostic(code(mvpe::schema::missing_field))]
    MissingField { path: Path },

    #[error("`{path}` has unknown field type `{type_name}`")]
    #[diagnostic(code(mvpe::schema::unknown_field_type))]
    UnknownFieldType { path: Path, type_name: String },

    #[error("method id {id} is used by more than one method in service `{service}`")]
    #[diagnostic(code(mvpe::schema::duplicate_method_id))]
    DuplicateMethodId { service: String, id: u16 },

    #[error("message name `{name}` is defined more than once")]
    #[diagnostic(code(mvpe::schema::duplicate_message_name))]
    DuplicateMessageName { name: String },

    #[error("`{name}` is referenced as a request/response type but is not defined")]
    #[diagnostic(code(mvpe::schema::undefined_message_reference))]
    UndefinedMessageReference { name: String },

    #[error("id assignment failed: {0}")]
    #[diagnostic(code(mvpe::schema::id_error))]
    Id(String),
}

impl From<IdError> for SchemaError {
    fn from(e: IdError) -> Self {
        SchemaError::Id(e.to_string())
    }
}

impl Schema {
    /// Parse and syntactically validate a schema from YAML text (section
    /// 4.5.1/4.5.2). Does not assign ids; call [`Schema::assign_ids`]
    /// afterwards.
    pub fn from_yaml(text: &str) -> Result<Schema, SchemaError> {
        let raw: RawSchema = serde_yaml::from_str(text).map_err(|e| SchemaError::YamlParseError {
            details: e.to_string(),
        })?;
        Schema::from_raw(raw)
    }

    fn from_raw(raw: RawSchema) -> Result<Schema, SchemaError> {
        let mut errors = Vec::new();

        if raw.service.trim().is_empty() {
            errors.push(SchemaError::MissingField {
                path: Path("service".to_string()),
            });
        }
        if raw.methods.is_empty() {
            errors.push(SchemaError::MissingField {
                path: Path("methods".to_string()),
            });
        }

        let mut message_names = HashSet::new();
        let mut messages = Vec::with_capacity(raw.messages.len());
        for (mi, rm) in raw.messages.into_iter().enumerate() {
            let path_prefix = format!("messages[{mi}]");
            if rm.name.trim().is_empty() {
                errors.push(SchemaError::MissingField {
                    path: Path(format!("{path_prefix}.name")),
                });
                continue;
            }
            if !message_names.insert(rm.name.clone()) {
                errors.push(SchemaError::DuplicateMessageName { name: rm.name.clone() });
            }
            if rm.fields.is_empty() {
                errors.push(SchemaError::MissingField {
                    path: Path(format!("{path_prefix}.fields")),
                });
            }

            let mut fields = Vec::with_capacity(rm.fields.len());
            for (fi, rf) in rm.fields.into_iter().enumerate() {
                let field_path = format!("{path_prefix}.fields[{fi}]");
                if rf.name.trim().is_empty() {
                    errors.push(SchemaError::MissingField {
                        path: Path(format!("{field_path}.name")),
                    });
                    continue;
                }
                match FieldTypeName::parse(&rf.type_name) {
                    Some(ty) => fields.push(Field {
                        name: rf.name,
                        ty,
                        optional: rf.optional,
                        default: rf.default,
                    }),
                    None => errors.push(SchemaError::UnknownFieldType {
                        path: Path(field_path),
                        type_name: rf.type_name,
                    }),
                }
            }
            messages.push(Message {
                name: rm.name,
                id: None,
                fields,
            });
        }

        let mut method_ids_seen = HashSet::new();
        let mut methods = Vec::with_capacity(raw.methods.len());
        for (mi, rmeth) in raw.methods.into_iter().enumerate() {
            let path_prefix = format!("methods[{mi}]");
            if rmeth.name.trim().is_empty() {
                errors.push(SchemaError::MissingField {
                    path: Path(format!("{path_prefix}.name")),
                });
            }
            if rmeth.request.trim().is_empty() {
                errors.push(SchemaError::MissingField {
                    path: Path(format!("{path_prefix}.request")),
                });
            } else if !message_names.contains(&rmeth.request) {
                errors.push(SchemaError::UndefinedMessageReference {
                    name: rmeth.request.clone(),
                });
            }
            if rmeth.response.trim().is_empty() {
                errors.push(SchemaError::MissingField {
                    path: Path(format!("{path_prefix}.response")),
                });
            } else if !message_names.contains(&rmeth.response) {
                errors.push(SchemaError::UndefinedMessageReference {
                    name: rmeth.response.clone(),
                });
            }
            if let Some(id) = rmeth.id {
                if !method_ids_seen.insert(id) {
                    errors.push(SchemaError::DuplicateMethodId {
                        service: raw.service.clone(),
                        id,
                    });
                }
            }
            methods.push(Method {
                name: rmeth.name,
                id: rmeth.id,
                request: rmeth.request,
                response: rmeth.response,
            });
        }

        if !errors.is_empty() {
            return Err(SchemaError::InvalidSchema { errors });
        }

        Ok(Schema {
            service: raw.service,
            service_id: raw.id,
            methods,
            messages,
        })
    }

    /// Drive [`IdAllocator`] over this schema's symbols (section 4.4.7),
    /// resolving aliases first and mutating `self` in place with the
    /// resulting ids. Returns the (possibly canonicalized) service name.
    pub fn assign_ids(&mut self, allocator: &mut IdAllocator) -> Result<(), SchemaError> {
        let canonical_service = allocator.resolve_service_alias(&self.service)?;
        self.service = canonical_service;
        self.service_id = Some(allocator.assign_service_id(&self.service, self.service_id)?);

        for method in &mut self.methods {
            method.id = Some(allocator.assign_method_id(&self.service, &method.name, method.id)?);
        }

        for message in &mut self.messages {
            let canonical = allocator.resolve_message_alias(&message.name)?;
            message.name = canonical;
            message.id = Some(allocator.assign_message_id(&message.name, message.id)?);
        }

        Ok(())
    }
}
