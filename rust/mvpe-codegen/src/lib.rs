//! Target-language stub generator (component C5, generator half). See
//! `SPEC_FULL.md` section 4.5.3/6.5.
//!
//! Given a validated, id-assigned [`mvpe_schema::Schema`], emits Rust source
//! text for:
//!
//! 1. a service trait with one operation per method (doc comment records
//!    the numeric method id);
//! 2. one record struct per message, implementing `mvpe_codec::Record`;
//! 3. a dispatcher whose `dispatch` is a closed `match` over method ids —
//!    never runtime introspection;
//! 4. a client stub that serializes through the codec and hands the
//!    envelope to an externally-provided transport closure.
//!
//! Regenerating from the same [`mvpe_schema::Schema`] always produces
//! byte-identical output (section 4.5.3 point 4): every loop below walks
//! `Vec`s in schema-declaration order, never a `HashMap`.

use heck::ToShoutySnakeCase;
use mvpe_schema::{Field, FieldTypeName, Message, Method, Schema};

/// Lower the first character of `name`. This is the exact mapping from
/// schema method name to generated operation name (section 4.5.3 point 1);
/// it deliberately does not canonicalize the rest of the identifier.
fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn rust_type(ty: FieldTypeName, optional: bool) -> String {
    let base = match ty {
        FieldTypeName::String => "String",
        FieldTypeName::Int32 => "i32",
        FieldTypeName::Int64 => "i64",
        FieldTypeName::Boolean => "bool",
        FieldTypeName::Float => "f32",
        FieldTypeName::Double => "f64",
        FieldTypeName::Bytes => "Vec<u8>",
    };
    if optional {
        format!("Option<{base}>")
    } else {
        base.to_string()
    }
}

fn write_call(field: &Field) -> String {
    let accessor = match field.ty {
        FieldTypeName::String => format!("sink.write_string(&self.{})", field.name),
        FieldTypeName::Int32 => format!("sink.write_i32(self.{})", field.name),
        FieldTypeName::Int64 => format!("sink.write_i64(self.{})", field.name),
        FieldTypeName::Boolean => format!("sink.write_bool(self.{})", field.name),
        FieldTypeName::Float => format!("sink.write_f32(self.{})", field.name),
        FieldTypeName::Double => format!("sink.write_f64(self.{})", field.name),
        FieldTypeName::Bytes => format!("sink.write_bytes(&self.{})", field.name),
    };
    if field.optional {
        let deref = match field.ty {
            FieldTypeName::String | FieldTypeName::Bytes => format!("self.{}", field.name),
            _ => format!("*v"),
        };
        let inner = match field.ty {
            FieldTypeName::String => format!("sink.write_string(v)"),
            FieldTypeName::Int32 => format!("sink.write_i32({deref})"),
            FieldTypeName::Int64 => format!("sink.write_i64({deref})"),
            FieldTypeName::Boolean => format!("sink.write_bool({deref})"),
            FieldTypeName::Float => format!("sink.write_f32({deref})"),
            FieldTypeName::Double => format!("sink.write_f64({deref})"),
            FieldTypeName::Bytes => format!("sink.write_bytes(v)"),
        };
        format!(
            "sink.write_presence(self.{name}.is_some());\n        if let Some(v) = &self.{name} {{ {inner}; }}",
            name = field.name
        )
    } else {
        format!("{accessor};")
    }
}

fn read_call(field: &Field) -> String {
    let read_expr = match field.ty {
        FieldTypeName::String => "src.read_string()?",
        FieldTypeName::Int32 => "src.read_i32()?",
        FieldTypeName::Int64 => "src.read_i64()?",
        FieldTypeName::Boolean => "src.read_bool()?",
        FieldTypeName::Float => "src.read_f32()?",
        FieldTypeName::Double => "src.read_f64()?",
        FieldTypeName::Bytes => "src.read_bytes()?",
    };
    if field.optional {
        format!(
            "if src.read_presence()? {{ Some({read_expr}) }} else {{ None }}"
        )
    } else {
        read_expr.to_string()
    }
}

fn generate_message(message: &Message) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "/// Generated from message `{name}` (id {id}).\n#[derive(Debug, Clone, PartialEq)]\npub struct {name} {{\n",
        name = message.name,
        id = message.id.unwrap_or(0),
    ));
    for field in &message.fields {
        out.push_str(&format!(
            "    pub {}: {},\n",
            field.name,
            rust_type(field.ty, field.optional)
        ));
    }
    out.push_str("}\n\n");

    out.push_str(&format!(
        "impl mvpe_codec::Record for {name} {{\n\
         \x20   fn type_name() -> &'static str {{ \"{name}\" }}\n\n\
         \x20   fn layout() -> mvpe_codec::RecordLayout {{\n\
         \x20       mvpe_codec::RecordLayout {{\n\
         \x20           type_name: \"{name}\",\n\
         \x20           fields: vec![\n",
        name = message.name,
    ));
    for field in &message.fields {
        let ty_variant = match field.ty {
            FieldTypeName::String => "String",
            FieldTypeName::Int32 => "I32",
            FieldTypeName::Int64 => "I64",
            FieldTypeName::Boolean => "Bool",
            FieldTypeName::Float => "F32",
            FieldTypeName::Double => "F64",
            FieldTypeName::Bytes => "Bytes",
        };
        out.push_str(&format!(
            "                mvpe_codec::FieldDescriptor {{ name: \"{}\", ty: mvpe_codec::FieldType::{}, optional: {} }},\n",
            field.name, ty_variant, field.optional
        ));
    }
    out.push_str("            ],\n        }\n    }\n\n");

    out.push_str(&format!(
        "    fn write_fields(&self, sink: &mut dyn mvpe_codec::Sink) {{\n"
    ));
    for field in &message.fields {
        out.push_str(&format!("        {}\n", write_call(field)));
    }
    out.push_str("    }\n\n");

    out.push_str(
        "    fn read_fields(src: &mut dyn mvpe_codec::Source) -> Result<Self, mvpe_codec::CodecError> {\n\
         \x20       Ok(Self {\n",
    );
    for field in &message.fields {
        out.push_str(&format!(
            "            {}: {},\n",
            field.name,
            read_call(field)
        ));
    }
    out.push_str("        })\n    }\n}\n\n");

    out
}

fn generate_service_trait(schema: &Schema) -> String {
    let mut out = format!("/// Generated service interface for `{}`.\n", schema.service);
    out.push_str(&format!("pub trait {} {{\n", schema.service));
    for method in &schema.methods {
        out.push_str(&format!(
            "    /// Method id: {id}.\n    fn {op}(&self, request: {req}) -> {resp};\n",
            id = method.id.unwrap_or(0),
            op = lower_first(&method.name),
            req = method.request,
            resp = method.response,
        ));
    }
    out.push_str("}\n\n");
    out
}

fn generate_dispatcher(schema: &Schema) -> String {
    let dispatcher_name = format!("{}Dispatcher", schema.service);
    let mut out = format!(
        "/// Closed-case-analysis dispatcher for `{service}`. `dispatch` never\n\
         /// performs runtime introspection: the match below is exhaustive over\n\
         /// every method id this service was generated with.\n\
         pub struct {dispatcher_name}<S: {service}> {{\n    pub inner: S,\n}}\n\n\
         impl<S: {service}> {dispatcher_name}<S> {{\n\
         \x20   pub fn new(inner: S) -> Self {{ Self {{ inner }} }}\n\n\
         \x20   pub fn dispatch(\n\
         \x20       &self,\n\
         \x20       method_id: u16,\n\
         \x20       envelope: &mvpe_envelope::Envelope,\n\
         \x20       registry: &mvpe_codec::MessageRegistry,\n\
         \x20       cache: &mvpe_codec::LayoutCache,\n\
         \x20       pool: &mvpe_pool::Pool,\n\
         \x20   ) -> Result<mvpe_envelope::Envelope, mvpe_codec::CodecError> {{\n\
         \x20       match method_id {{\n",
        service = schema.service,
    );
    for method in &schema.methods {
        out.push_str(&format!(
            "            {id} => {{\n\
             \x20               let request: {req} = mvpe_codec::decode(registry, cache, envelope)?;\n\
             \x20               let response = self.inner.{op}(request);\n\
             \x20               mvpe_codec::encode(registry, cache, pool, &response, envelope.correlation_id()?)\n\
             \x20           }}\n",
            id = method.id.unwrap_or(0),
            req = method.request,
            op = lower_first(&method.name),
        ));
    }
    out.push_str(&format!(
        "            other => Err(mvpe_codec::CodecError::UnknownMessageId {{ method_id: other }}),\n        }}\n    }}\n}}\n\n"
    ));
    out
}

fn generate_method_id_constants(schema: &Schema) -> String {
    let mut out = String::new();
    for method in &schema.methods {
        out.push_str(&format!(
            "pub const {const_name}: u16 = {id};\n",
            const_name = format!("{}_{}", schema.service, method.name).to_shouty_snake_case(),
            id = method.id.unwrap_or(0),
        ));
    }
    out.push('\n');
    out
}

fn generate_client_stub(schema: &Schema) -> String {
    let stub_name = format!("{}Client", schema.service);
    let mut out = format!(
        "/// Client stub for `{service}`. Serializes requests through the codec\n\
         /// and hands the resulting envelope to an externally-provided\n\
         /// transport closure (network I/O is out of scope for this crate).\n\
         pub struct {stub_name}<T> {{\n\
         \x20   pub registry: std::sync::Arc<mvpe_codec::MessageRegistry>,\n\
         \x20   pub cache: std::sync::Arc<mvpe_codec::LayoutCache>,\n\
         \x20   pub pool: mvpe_pool::Pool,\n\
         \x20   pub transport: T,\n\
         }}\n\n",
        service = schema.service,
    );
    out.push_str(&format!(
        "impl<T> {stub_name}<T>\nwhere\n    T: Fn(mvpe_envelope::Envelope) -> Result<mvpe_envelope::Envelope, mvpe_codec::CodecError>,\n{{\n",
    ));
    for method in &schema.methods {
        out.push_str(&format!(
            "    pub fn {op}(&self, request: {req}) -> Result<{resp}, mvpe_codec::CodecError> {{\n\
             \x20       let envelope = mvpe_codec::encode(&self.registry, &self.cache, &self.pool, &request, 0)?;\n\
             \x20       let response_envelope = (self.transport)(envelope)?;\n\
             \x20       mvpe_codec::decode(&self.registry, &self.cache, &response_envelope)\n    }}\n\n",
            op = lower_first(&method.name),
            req = method.request,
            resp = method.response,
        ));
    }
    out.push_str("}\n\n");
    out
}

/// Emit the complete generated Rust module for `schema` (section 4.5.3).
/// `schema` must already have been through [`mvpe_schema::Schema::assign_ids`];
/// every `id` field is expected to be `Some`.
pub fn generate_rust(schema: &Schema) -> String {
    let mut out = format!(
        "// Generated by mvpe-codegen from the `{}` service. Do not edit by hand;\n// regenerate instead.\n\n",
        schema.service
    );
    out.push_str(&generate_method_id_constants(schema));
    for message in &schema.messages {
        out.push_str(&generate_message(message));
    }
    out.push_str(&generate_service_trait(schema));
    out.push_str(&generate_dispatcher(schema));
    out.push_str(&generate_client_stub(schema));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvpe_ids::{IdAllocator, Mode};

    fn account_schema() -> Schema {
        let yaml = r#"
service: AccountService
methods:
  - name: GetBalance
    request: GetBalanceRequest
    response: GetBalanceResponse
messages:
  - name: GetBalanceRequest
    fields:
      - name: accountId
        type: string
  - name: GetBalanceResponse
    fields:
      - name: balance
        type: int64
      - name: note
        type: string
        optional: true
"#;
        let mut schema = Schema::from_yaml(yaml).unwrap();
        let mut allocator = IdAllocator::in_memory(Mode::Off);
        schema.assign_ids(&mut allocator).unwrap();
        schema
    }

    #[test]
    fn lower_first_only_touches_first_char() {
        assert_eq!(lower_first("GetBalance"), "getBalance");
        assert_eq!(lower_first("TransferFUNDS"), "transferFUNDS");
    }

    #[test]
    fn generated_output_contains_trait_and_records() {
        let schema = account_schema();
        let out = generate_rust(&schema);
        assert!(out.contains("pub trait AccountService"));
        assert!(out.contains("pub struct GetBalanceRequest"));
        assert!(out.contains("pub struct GetBalanceResponse"));
        assert!(out.contains("impl mvpe_codec::Record for GetBalanceRequest"));
        assert!(out.contains("pub struct AccountServiceDispatcher"));
        assert!(out.contains("pub struct AccountServiceClient"));
    }

    #[test]
    fn optional_field_emits_presence_handling() {
        let schema = account_schema();
        let out = generate_rust(&schema);
        assert!(out.contains("sink.write_presence(self.note.is_some())"));
        assert!(out.contains("if src.read_presence()?"));
    }

    #[test]
    fn regeneration_is_byte_identical() {
        // Section 4.5.3 point 4.
        let schema = account_schema();
        assert_eq!(generate_rust(&schema), generate_rust(&schema));
    }

    #[test]
    fn dispatch_is_a_closed_match_over_method_ids() {
        let schema = account_schema();
        let out = generate_rust(&schema);
        let method_id = schema.methods[0].id.unwrap();
        assert!(out.contains(&format!("{method_id} => {{")));
        assert!(out.contains("other => Err(mvpe_codec::CodecError::UnknownMessageId"));
    }
}
