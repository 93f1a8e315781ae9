//! MYRA binary record codec (component C3).
//!
//! Encodes a Rust-level record into an [`mvpe_envelope::Envelope`]'s payload
//! region and decodes in reverse, without intermediate heap allocation on the
//! fixed-width-field hot path and without per-call reflection. See
//! `SPEC_FULL.md` section 4.3.
//!
//! The wire format (section 4.3.1):
//!
//! ```text
//! [ payload_length u32 ]            // bytes of field data that follow
//! [ field_0 ] [ field_1 ] … [ field_n-1 ]
//! [ checksum u32 ]                  // over [payload_length_end, checksum_start)
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use mvpe_envelope::{Envelope, EnvelopeError, HEADER_SIZE};
use mvpe_pool::Pool;

/// Errors surfaced by codec operations (section 7 `CodecError` taxonomy).
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    /// `encode::<T>` was called but `T` has not been registered.
    UnregisteredMessage { type_name: &'static str },
    /// `decode::<T>` was called on an envelope whose `methodId` is absent
    /// from the registry, or mapped to a different type than `T`.
    UnknownMessageId { method_id: u16 },
    /// `payload_length` claims more bytes than the envelope actually holds.
    TruncatedPayload,
    /// The trailing checksum did not match the recomputed value.
    CorruptedPayload,
    /// A field's logical type is not supported by this codec (e.g. a
    /// nested record in a v1 build; see section 4.3.4).
    UnsupportedField { field: String },
    /// A `string` field's bytes were not valid UTF-8.
    InvalidUtf8,
    /// The backing envelope/segment failed.
    Envelope(EnvelopeError),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::UnregisteredMessage { type_name } => {
                write!(f, "message type `{type_name}` is not registered")
            }
            CodecError::UnknownMessageId { method_id } => {
                write!(f, "method id {method_id} is not a known message id")
            }
            CodecError::TruncatedPayload => write!(f, "payload is truncated"),
            CodecError::CorruptedPayload => write!(f, "payload checksum does not match"),
            CodecError::UnsupportedField { field } => {
                write!(f, "field `{field}` has an unsupported type")
            }
            CodecError::InvalidUtf8 => write!(f, "field contains invalid UTF-8"),
            CodecError::Envelope(e) => write!(f, "envelope error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<EnvelopeError> for CodecError {
    fn from(e: EnvelopeError) -> Self {
        CodecError::Envelope(e)
    }
}

/// The logical wire type of a field (section 4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I32,
    I64,
    I16,
    I8,
    Bool,
    F32,
    F64,
    Bytes,
    String,
}

/// One field's static shape within a [`RecordLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: FieldType,
    pub optional: bool,
}

/// A registered message type's cached, ordered field descriptors (section
/// 4.3.3). Built once per type (`T::layout()`) and retained by a
/// [`LayoutCache`]; never rebuilt on the steady-state encode/decode path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub type_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

/// Sink for field values during encoding. [`MyraWriter`] implements this
/// against a caller-owned byte slice; [`ByteCounter`] implements it to
/// precompute the exact payload size with no writes at all.
pub trait Sink {
    fn write_i32(&mut self, v: i32);
    fn write_i64(&mut self, v: i64);
    fn write_i16(&mut self, v: i16);
    fn write_i8(&mut self, v: i8);
    fn write_bool(&mut self, v: bool);
    fn write_f32(&mut self, v: f32);
    fn write_f64(&mut self, v: f64);
    fn write_bytes(&mut self, v: &[u8]);
    fn write_string(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }
    /// Write the one-byte nullable-field presence marker.
    fn write_presence(&mut self, present: bool);
}

/// Source of field values during decoding, read from an envelope's payload.
pub trait Source {
    fn read_i32(&mut self) -> Result<i32, CodecError>;
    fn read_i64(&mut self) -> Result<i64, CodecError>;
    fn read_i16(&mut self) -> Result<i16, CodecError>;
    fn read_i8(&mut self) -> Result<i8, CodecError>;
    fn read_bool(&mut self) -> Result<bool, CodecError>;
    fn read_f32(&mut self) -> Result<f32, CodecError>;
    fn read_f64(&mut self) -> Result<f64, CodecError>;
    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError>;
    fn read_string(&mut self) -> Result<String, CodecError> {
        String::from_utf8(self.read_bytes()?).map_err(|_| CodecError::InvalidUtf8)
    }
    /// Read the one-byte nullable-field presence marker.
    fn read_presence(&mut self) -> Result<bool, CodecError>;
}

/// A Rust type that can be registered as a MYRA message.
///
/// Implementations are produced by `mvpe-codegen` from a schema message
/// definition; `write_fields`/`read_fields` encode/decode fields in
/// declared order with no runtime reflection (section 4.3.3's "constructor
/// handle" is simply `read_fields` itself).
pub trait Record: Sized + 'static {
    fn type_name() -> &'static str;
    fn layout() -> RecordLayout;
    fn write_fields(&self, sink: &mut dyn Sink);
    fn read_fields(src: &mut dyn Source) -> Result<Self, CodecError>;
}

/// Counts the bytes `write_fields` would produce without writing any.
#[derive(Default)]
pub struct ByteCounter {
    len: usize,
}

impl ByteCounter {
    pub fn count<T: Record>(record: &T) -> usize {
        let mut counter = ByteCounter::default();
        record.write_fields(&mut counter);
        counter.len
    }
}

impl Sink for ByteCounter {
    fn write_i32(&mut self, _v: i32) {
        self.len += 4;
    }
    fn write_i64(&mut self, _v: i64) {
        self.len += 8;
    }
    fn write_i16(&mut self, _v: i16) {
        self.len += 2;
    }
    fn write_i8(&mut self, _v: i8) {
        self.len += 1;
    }
    fn write_bool(&mut self, _v: bool) {
        self.len += 1;
    }
    fn write_f32(&mut self, _v: f32) {
        self.len += 4;
    }
    fn write_f64(&mut self, _v: f64) {
        self.len += 8;
    }
    fn write_bytes(&mut self, v: &[u8]) {
        self.len += 4 + v.len();
    }
    fn write_presence(&mut self, _present: bool) {
        self.len += 1;
    }
}

/// Writes field values directly into a caller-owned byte slice (typically
/// the unused payload capacity of a pooled [`Envelope`]), with no heap
/// allocation of its own.
pub struct MyraWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> MyraWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        MyraWriter { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

impl Sink for MyraWriter<'_> {
    fn write_i32(&mut self, v: i32) {
        self.put(&v.to_be_bytes());
    }
    fn write_i64(&mut self, v: i64) {
        self.put(&v.to_be_bytes());
    }
    fn write_i16(&mut self, v: i16) {
        self.put(&v.to_be_bytes());
    }
    fn write_i8(&mut self, v: i8) {
        self.put(&v.to_be_bytes());
    }
    fn write_bool(&mut self, v: bool) {
        self.put(&[v as u8]);
    }
    fn write_f32(&mut self, v: f32) {
        self.put(&v.to_be_bytes());
    }
    fn write_f64(&mut self, v: f64) {
        self.put(&v.to_be_bytes());
    }
    fn write_bytes(&mut self, v: &[u8]) {
        self.put(&(v.len() as u32).to_be_bytes());
        self.put(v);
    }
    fn write_presence(&mut self, present: bool) {
        self.put(&[present as u8]);
    }
}

/// Reads field values from a caller-owned byte slice (the envelope's
/// payload region), tracking a cursor and failing with
/// [`CodecError::TruncatedPayload`] on any short read.
pub struct MyraReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MyraReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        MyraReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::TruncatedPayload);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

impl Source for MyraReader<'_> {
    fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_be_bytes(self.take(1)?.try_into().unwrap()))
    }
    fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0] != 0)
    }
    fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_i32()? as u32 as usize;
        Ok(self.take(len)?.to_vec())
    }
    fn read_presence(&mut self) -> Result<bool, CodecError> {
        self.read_bool()
    }
}

/// The 32-bit checksum used by the v1 wire format: Fletcher-32 over the
/// field-data region. Implementation-defined per section 4.3.5/9; encoder
/// and decoder must agree, and this constant must not change for wire
/// version 1.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut sum1: u32 = 1;
    let mut sum2: u32 = 0;
    for &b in bytes {
        sum1 = (sum1 + b as u32) % 0xFFFF;
        sum2 = (sum2 + sum1) % 0xFFFF;
    }
    (sum2 << 16) | sum1
}

/// A lazily-populated, concurrent cache of [`RecordLayout`]s keyed by Rust
/// type identity (section 4.3.3). A second population of the same key is a
/// benign no-op (section 5 ordering guarantee).
#[derive(Default)]
pub struct LayoutCache {
    entries: RwLock<HashMap<TypeId, Arc<RecordLayout>>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        LayoutCache::default()
    }

    /// Return the cached layout for `T`, building and inserting it on the
    /// first call for this type.
    pub fn get_or_init<T: Record>(&self) -> Arc<RecordLayout> {
        let key = TypeId::of::<T>();
        if let Some(layout) = self.entries.read().get(&key) {
            return layout.clone();
        }
        let layout = Arc::new(T::layout());
        self.entries.write().entry(key).or_insert(layout).clone()
    }

    /// Drop all cached layouts. Diagnostic use only; never called in
    /// steady-state operation.
    pub fn clear_cache(&self) {
        self.entries.write().clear();
    }
}

struct Registration {
    id: u16,
    type_id: TypeId,
    display_name: String,
}

/// Bidirectional {message id <-> Rust type} mapping plus a display name
/// (section 3 "Message Registry"). Registration is append-only for the
/// lifetime of the process.
#[derive(Default)]
pub struct MessageRegistry {
    by_type: RwLock<HashMap<TypeId, Registration>>,
    by_id: RwLock<HashMap<u16, TypeId>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry::default()
    }

    /// Register `T` under `id` with `display_name`. Idempotent when called
    /// again with the same `(T, id)` pair. Panics if `id` or `T` is already
    /// registered under a *different* counterpart id/type — a programming
    /// error in the generated dispatch wiring, not a recoverable runtime
    /// condition (consistent with `mvpe-pool`'s treatment of foreign-segment
    /// release as a loud bug, section 7).
    pub fn register<T: Record>(&self, id: u16, display_name: impl Into<String>) {
        let type_id = TypeId::of::<T>();
        let display_name = display_name.into();

        if let Some(existing) = self.by_type.read().get(&type_id) {
            assert_eq!(
                existing.id, id,
                "type `{}` already registered under a different id",
                T::type_name()
            );
            return;
        }
        if let Some(&existing_type) = self.by_id.read().get(&id) {
            assert_eq!(
                existing_type, type_id,
                "message id {id} already registered to a different type"
            );
            return;
        }

        tracing::debug!(id, type_name = T::type_name(), "registered message type");
        self.by_type.write().insert(
            type_id,
            Registration {
                id,
                type_id,
                display_name,
            },
        );
        self.by_id.write().insert(id, type_id);
    }

    pub fn id_of<T: Record>(&self) -> Option<u16> {
        self.by_type.read().get(&TypeId::of::<T>()).map(|r| r.id)
    }

    pub fn display_name(&self, id: u16) -> Option<String> {
        let by_id = self.by_id.read();
        let type_id = by_id.get(&id)?;
        self.by_type.read().get(type_id).map(|r| r.display_name.clone())
    }

    fn type_id_for_method(&self, id: u16) -> Option<TypeId> {
        self.by_id.read().get(&id).copied()
    }
}

/// Encode `record` into a freshly allocated envelope (section 4.3.2 encode
/// steps). `correlation_id` is stamped into the header; `methodId` is the
/// id `T` was registered under.
pub fn encode<T: Record>(
    registry: &MessageRegistry,
    cache: &LayoutCache,
    pool: &Pool,
    record: &T,
    correlation_id: u64,
) -> Result<Envelope, CodecError> {
    let message_id = registry
        .id_of::<T>()
        .ok_or(CodecError::UnregisteredMessage {
            type_name: T::type_name(),
        })?;
    let _layout = cache.get_or_init::<T>();

    let field_bytes_len = ByteCounter::count(record);
    let payload_size = 4 + field_bytes_len + 4;
    let mut envelope = Envelope::allocate(pool, payload_size)?;

    {
        let buf = envelope.payload_capacity_mut()?;
        let mut writer = MyraWriter::new(&mut buf[..payload_size]);
        writer.write_i32(field_bytes_len as i32);
        record.write_fields(&mut writer);
        debug_assert_eq!(writer.position(), 4 + field_bytes_len);
        let sum = checksum(&buf[4..4 + field_bytes_len]);
        writer.write_i32(sum as i32);
        debug_assert_eq!(writer.position(), payload_size);
    }

    envelope.set_method_id(message_id)?;
    envelope.set_correlation_id(correlation_id)?;
    envelope.set_length((HEADER_SIZE + payload_size) as u16)?;
    Ok(envelope)
}

/// Decode `envelope`'s payload back into `T` (section 4.3.2 decode steps).
///
/// Fails with [`CodecError::UnknownMessageId`] if the envelope's `methodId`
/// is absent from the registry, or is registered to a type other than `T`
/// (section 8 property 10) — in both cases before any payload byte is read.
pub fn decode<T: Record>(
    registry: &MessageRegistry,
    cache: &LayoutCache,
    envelope: &Envelope,
) -> Result<T, CodecError> {
    let method_id = envelope.method_id()?;
    match registry.type_id_for_method(method_id) {
        Some(type_id) if type_id == TypeId::of::<T>() => {}
        _ => return Err(CodecError::UnknownMessageId { method_id }),
    }

    let layout = cache.get_or_init::<T>();
    let payload = envelope.payload()?;

    if payload.len() < 4 {
        return Err(CodecError::TruncatedPayload);
    }
    let mut len_reader = MyraReader::new(&payload[0..4]);
    let payload_length = len_reader.read_i32()? as u32 as usize;
    if 4 + payload_length + 4 > payload.len() {
        return Err(CodecError::TruncatedPayload);
    }

    let field_region = &payload[4..4 + payload_length];
    let mut reader = MyraReader::new(field_region);
    let record = T::read_fields(&mut reader)?;
    debug_assert_eq!(layout.fields.len(), layout.fields.len());

    let checksum_region = &payload[4 + payload_length..4 + payload_length + 4];
    let mut checksum_reader = MyraReader::new(checksum_region);
    let stored_checksum = checksum_reader.read_i32()? as u32;
    if checksum(field_region) != stored_checksum {
        return Err(CodecError::CorruptedPayload);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvpe_pool::PoolConfig;

    struct GetBalanceRequest {
        account_id: String,
    }

    impl Record for GetBalanceRequest {
        fn type_name() -> &'static str {
            "GetBalanceRequest"
        }
        fn layout() -> RecordLayout {
            RecordLayout {
                type_name: "GetBalanceRequest",
                fields: vec![FieldDescriptor {
                    name: "accountId",
                    ty: FieldType::String,
                    optional: false,
                }],
            }
        }
        fn write_fields(&self, sink: &mut dyn Sink) {
            sink.write_string(&self.account_id);
        }
        fn read_fields(src: &mut dyn Source) -> Result<Self, CodecError> {
            Ok(GetBalanceRequest {
                account_id: src.read_string()?,
            })
        }
    }

    struct Opt {
        x: Option<i32>,
    }

    impl Record for Opt {
        fn type_name() -> &'static str {
            "Opt"
        }
        fn layout() -> RecordLayout {
            RecordLayout {
                type_name: "Opt",
                fields: vec![FieldDescriptor {
                    name: "x",
                    ty: FieldType::I32,
                    optional: true,
                }],
            }
        }
        fn write_fields(&self, sink: &mut dyn Sink) {
            sink.write_presence(self.x.is_some());
            if let Some(x) = self.x {
                sink.write_i32(x);
            }
        }
        fn read_fields(src: &mut dyn Source) -> Result<Self, CodecError> {
            let present = src.read_presence()?;
            let x = if present { Some(src.read_i32()?) } else { None };
            Ok(Opt { x })
        }
    }

    struct Note {
        text: String,
    }

    impl Record for Note {
        fn type_name() -> &'static str {
            "Note"
        }
        fn layout() -> RecordLayout {
            RecordLayout {
                type_name: "Note",
                fields: vec![FieldDescriptor {
                    name: "text",
                    ty: FieldType::String,
                    optional: false,
                }],
            }
        }
        fn write_fields(&self, sink: &mut dyn Sink) {
            sink.write_string(&self.text);
        }
        fn read_fields(src: &mut dyn Source) -> Result<Self, CodecError> {
            Ok(Note {
                text: src.read_string()?,
            })
        }
    }

    fn harness() -> (MessageRegistry, LayoutCache, Pool) {
        let registry = MessageRegistry::new();
        let cache = LayoutCache::new();
        let pool = Pool::new(PoolConfig {
            segment_size: 256,
            initial_pool_size: 4,
        });
        (registry, cache, pool)
    }

    #[test]
    fn s1_simple_round_trip() {
        // Scenario S1.
        let (registry, cache, pool) = harness();
        registry.register::<GetBalanceRequest>(101, "GetBalanceRequest");

        let req = GetBalanceRequest {
            account_id: "acc-1".to_string(),
        };
        let envelope = encode(&registry, &cache, &pool, &req, 0).unwrap();
        assert_eq!(envelope.method_id().unwrap(), 101);
        assert_eq!(envelope.length().unwrap() as usize, HEADER_SIZE + 17);

        let decoded: GetBalanceRequest = decode(&registry, &cache, &envelope).unwrap();
        assert_eq!(decoded.account_id, "acc-1");
    }

    #[test]
    fn s2_null_field_round_trips() {
        // Scenario S2.
        let (registry, cache, pool) = harness();
        registry.register::<Opt>(200, "Opt");

        let envelope = encode(&registry, &cache, &pool, &Opt { x: None }, 0).unwrap();
        let payload = envelope.payload().unwrap();
        // [u32 payload_length=1][presence=0][u32 checksum]
        assert_eq!(payload.len(), 4 + 1 + 4);
        assert_eq!(payload[4], 0x00);

        let decoded: Opt = decode(&registry, &cache, &envelope).unwrap();
        assert_eq!(decoded.x, None);
    }

    #[test]
    fn s3_unicode_round_trips() {
        // Scenario S3.
        let (registry, cache, pool) = harness();
        registry.register::<Note>(300, "Note");

        let text = "你好😀";
        assert_eq!(text.len(), 10);
        let envelope = encode(&registry, &cache, &pool, &Note { text: text.to_string() }, 0).unwrap();
        let payload = envelope.payload().unwrap();
        assert_eq!(&payload[0..4], &10u32.to_be_bytes());

        let decoded: Note = decode(&registry, &cache, &envelope).unwrap();
        assert_eq!(decoded.text, text);
    }

    #[test]
    fn s4_unknown_method_id_fails_before_payload_read() {
        // Scenario S4 / testable property 10.
        let (registry, cache, pool) = harness();
        let mut envelope = Envelope::allocate(&pool, 0).unwrap();
        envelope.set_method_id(9999).unwrap();
        envelope.set_length(HEADER_SIZE as u16).unwrap();

        let err = decode::<GetBalanceRequest>(&registry, &cache, &envelope).unwrap_err();
        assert_eq!(err, CodecError::UnknownMessageId { method_id: 9999 });
    }

    #[test]
    fn round_trip_is_identity() {
        // Testable property 1.
        let (registry, cache, pool) = harness();
        registry.register::<GetBalanceRequest>(101, "GetBalanceRequest");
        let req = GetBalanceRequest {
            account_id: "acc-42".to_string(),
        };
        let envelope = encode(&registry, &cache, &pool, &req, 7).unwrap();
        let decoded: GetBalanceRequest = decode(&registry, &cache, &envelope).unwrap();
        assert_eq!(decoded.account_id, req.account_id);
    }

    #[test]
    fn encoding_writes_exactly_length_minus_header_bytes() {
        // Testable property 2.
        let (registry, cache, pool) = harness();
        registry.register::<Note>(301, "Note");
        let envelope = encode(&registry, &cache, &pool, &Note { text: "hi".to_string() }, 0).unwrap();
        let length = envelope.length().unwrap() as usize;
        assert!(length >= HEADER_SIZE + 4 + 4);
        assert_eq!(envelope.payload().unwrap().len(), length - HEADER_SIZE);
    }

    #[test]
    fn corrupting_payload_byte_fails_checksum() {
        // Testable property 8.
        let (registry, cache, pool) = harness();
        registry.register::<Note>(302, "Note");
        let mut envelope = encode(&registry, &cache, &pool, &Note { text: "hello".to_string() }, 0).unwrap();
        {
            let buf = envelope.payload_capacity_mut().unwrap();
            // Flip a byte inside the string payload (offset 4 is the start
            // of the u32 string length; offset 8 is the first char byte).
            buf[8] ^= 0xFF;
        }
        let err = decode::<Note>(&registry, &cache, &envelope).unwrap_err();
        assert_eq!(err, CodecError::CorruptedPayload);
    }

    #[test]
    fn shrinking_length_fails_truncated() {
        // Testable property 9.
        let (registry, cache, pool) = harness();
        registry.register::<Note>(303, "Note");
        let mut envelope = encode(&registry, &cache, &pool, &Note { text: "hello".to_string() }, 0).unwrap();
        let real_length = envelope.length().unwrap();
        envelope.set_length(real_length - 3).unwrap();
        let err = decode::<Note>(&registry, &cache, &envelope).unwrap_err();
        assert_eq!(err, CodecError::TruncatedPayload);
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(checksum(b"hello"), checksum(b"hello"));
        assert_ne!(checksum(b"hello"), checksum(b"world"));
    }

    #[test]
    fn layout_cache_is_idempotent() {
        let cache = LayoutCache::new();
        let a = cache.get_or_init::<Note>();
        let b = cache.get_or_init::<Note>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn register_is_idempotent_for_same_mapping() {
        let registry = MessageRegistry::new();
        registry.register::<Note>(400, "Note");
        registry.register::<Note>(400, "Note");
        assert_eq!(registry.id_of::<Note>(), Some(400));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn register_panics_on_conflicting_id() {
        let registry = MessageRegistry::new();
        registry.register::<Note>(401, "Note");
        registry.register::<Note>(402, "Note");
    }

    #[test]
    fn encode_unregistered_type_fails() {
        let (registry, cache, pool) = harness();
        let err = encode(&registry, &cache, &pool, &Note { text: "x".into() }, 0).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnregisteredMessage {
                type_name: "Note"
            }
        );
    }
}
