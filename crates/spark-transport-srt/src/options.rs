//! 选项编解码（OptionCodec）。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 调用方以扁平的 `名称 → 字符串` 映射描述套接字配置，而传输库只认“数值编号 + 原始类型”；
//!   本模块在两者之间做强类型转换，杜绝运行期类型猜测；
//! - 名称到 `(编号, 类型, 绑定阶段)` 的映射是一张编译期常量表 [`OPTION_TABLE`]，
//!   解析结果是带标签的 [`OptionValue`]。
//!
//! ## 契约（What）
//! - 未知名称返回 [`SrtError::UnknownOption`]；无法解析为声明类型的值返回
//!   [`SrtError::InvalidOptionValue`]，且不会产生任何副作用；
//! - 传输库拒绝（例如连接建立后设置绑定前选项）返回
//!   [`SrtError::OptionRejectedByTransport`]，附带底层错误码；
//! - 写入后读回与写入值类型一致、数值相同。
//!
//! ## 注意事项（Trade-offs）
//! - `blocking` 不是传输选项，它只决定本进程内的阻塞模式，由 [`SocketConfig`] 单独解析；
//! - `transtype` 会重置一组关联选项（延迟、消息 API 等），因此总是最先写入。

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use crate::{
    api::{Descriptor, SockOptValue, SrtApi},
    error::{ApiError, ErrorCode, SrtError},
};

/// 传输选项编号（`SRT_SOCKOPT`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionId(i32);

impl OptionId {
    pub const MSS: Self = Self(0);
    pub const SNDSYN: Self = Self(1);
    pub const RCVSYN: Self = Self(2);
    pub const FC: Self = Self(4);
    pub const SNDBUF: Self = Self(5);
    pub const RCVBUF: Self = Self(6);
    pub const LINGER: Self = Self(7);
    pub const SNDTIMEO: Self = Self(13);
    pub const RCVTIMEO: Self = Self(14);
    pub const MAXBW: Self = Self(16);
    pub const TSBPDMODE: Self = Self(22);
    pub const LATENCY: Self = Self(23);
    pub const INPUTBW: Self = Self(24);
    pub const OHEADBW: Self = Self(25);
    pub const PASSPHRASE: Self = Self(26);
    pub const PBKEYLEN: Self = Self(27);
    pub const IPTTL: Self = Self(29);
    pub const IPTOS: Self = Self(30);
    pub const TLPKTDROP: Self = Self(31);
    pub const SNDDROPDELAY: Self = Self(32);
    pub const NAKREPORT: Self = Self(33);
    pub const CONNTIMEO: Self = Self(36);
    pub const LOSSMAXTTL: Self = Self(42);
    pub const RCVLATENCY: Self = Self(43);
    pub const PEERLATENCY: Self = Self(44);
    pub const MINVERSION: Self = Self(45);
    pub const STREAMID: Self = Self(46);
    pub const CONGESTION: Self = Self(47);
    pub const MESSAGEAPI: Self = Self(48);
    pub const PAYLOADSIZE: Self = Self(49);
    pub const TRANSTYPE: Self = Self(50);
    pub const KMREFRESHRATE: Self = Self(51);
    pub const KMPREANNOUNCE: Self = Self(52);
    pub const ENFORCEDENCRYPTION: Self = Self(53);
    pub const PEERIDLETIMEO: Self = Self(55);
    pub const PACKETFILTER: Self = Self(60);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// 在选项表中查找该编号的描述。
    pub fn spec(self) -> Option<&'static OptionSpec> {
        OPTION_TABLE.iter().find(|spec| spec.id == self)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.spec() {
            Some(spec) => f.write_str(spec.name),
            None => write!(f, "option#{}", self.0),
        }
    }
}

/// 选项声明类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Int32,
    Int64,
    Bool,
    String,
    /// 传输模式枚举，底层以 `int32` 存储。
    TransType,
}

impl OptionKind {
    /// 底层存储类型；`TransType` 与 `Int32` 共用整数原语。
    pub(crate) const fn storage(self) -> OptionKind {
        match self {
            OptionKind::TransType => OptionKind::Int32,
            other => other,
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OptionKind::Int32 => "int32",
            OptionKind::Int64 => "int64",
            OptionKind::Bool => "bool",
            OptionKind::String => "string",
            OptionKind::TransType => "transtype (live|file|<int>)",
        })
    }
}

/// 选项允许写入的生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// 只能在绑定/建连之前写入。
    Pre,
    /// 任意阶段均可写入。
    Post,
}

/// 选项表中的一行。
#[derive(Debug, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub id: OptionId,
    pub kind: OptionKind,
    pub binding: Binding,
    /// 是否允许通过配置映射按名称设置。
    pub configurable: bool,
}

const fn opt(name: &'static str, id: OptionId, kind: OptionKind, binding: Binding) -> OptionSpec {
    OptionSpec {
        name,
        id,
        kind,
        binding,
        configurable: true,
    }
}

const fn internal(name: &'static str, id: OptionId, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        id,
        kind,
        binding: Binding::Post,
        configurable: false,
    }
}

/// 名称 → (编号, 类型, 绑定阶段) 常量表；`transtype` 必须位于首行。
pub static OPTION_TABLE: &[OptionSpec] = &[
    opt("transtype", OptionId::TRANSTYPE, OptionKind::TransType, Binding::Pre),
    opt("maxbw", OptionId::MAXBW, OptionKind::Int64, Binding::Pre),
    opt("pbkeylen", OptionId::PBKEYLEN, OptionKind::Int32, Binding::Pre),
    opt("passphrase", OptionId::PASSPHRASE, OptionKind::String, Binding::Pre),
    opt("mss", OptionId::MSS, OptionKind::Int32, Binding::Pre),
    opt("fc", OptionId::FC, OptionKind::Int32, Binding::Pre),
    opt("sndbuf", OptionId::SNDBUF, OptionKind::Int32, Binding::Pre),
    opt("rcvbuf", OptionId::RCVBUF, OptionKind::Int32, Binding::Pre),
    opt("ipttl", OptionId::IPTTL, OptionKind::Int32, Binding::Pre),
    opt("iptos", OptionId::IPTOS, OptionKind::Int32, Binding::Pre),
    opt("inputbw", OptionId::INPUTBW, OptionKind::Int64, Binding::Post),
    opt("oheadbw", OptionId::OHEADBW, OptionKind::Int32, Binding::Post),
    opt("latency", OptionId::LATENCY, OptionKind::Int32, Binding::Pre),
    opt("tsbpdmode", OptionId::TSBPDMODE, OptionKind::Bool, Binding::Pre),
    opt("tlpktdrop", OptionId::TLPKTDROP, OptionKind::Bool, Binding::Pre),
    opt("snddropdelay", OptionId::SNDDROPDELAY, OptionKind::Int32, Binding::Post),
    opt("nakreport", OptionId::NAKREPORT, OptionKind::Bool, Binding::Pre),
    opt("conntimeo", OptionId::CONNTIMEO, OptionKind::Int32, Binding::Pre),
    opt("lossmaxttl", OptionId::LOSSMAXTTL, OptionKind::Int32, Binding::Pre),
    opt("rcvlatency", OptionId::RCVLATENCY, OptionKind::Int32, Binding::Pre),
    opt("peerlatency", OptionId::PEERLATENCY, OptionKind::Int32, Binding::Pre),
    opt("minversion", OptionId::MINVERSION, OptionKind::Int32, Binding::Pre),
    opt("streamid", OptionId::STREAMID, OptionKind::String, Binding::Pre),
    opt("congestion", OptionId::CONGESTION, OptionKind::String, Binding::Pre),
    opt("messageapi", OptionId::MESSAGEAPI, OptionKind::Bool, Binding::Pre),
    opt("payloadsize", OptionId::PAYLOADSIZE, OptionKind::Int32, Binding::Pre),
    opt("kmrefreshrate", OptionId::KMREFRESHRATE, OptionKind::Int32, Binding::Pre),
    opt("kmpreannounce", OptionId::KMPREANNOUNCE, OptionKind::Int32, Binding::Pre),
    opt("enforcedencryption", OptionId::ENFORCEDENCRYPTION, OptionKind::Bool, Binding::Pre),
    opt("peeridletimeo", OptionId::PEERIDLETIMEO, OptionKind::Int32, Binding::Pre),
    opt("packetfilter", OptionId::PACKETFILTER, OptionKind::String, Binding::Pre),
    opt("linger", OptionId::LINGER, OptionKind::Int32, Binding::Post),
    internal("sndsyn", OptionId::SNDSYN, OptionKind::Bool),
    internal("rcvsyn", OptionId::RCVSYN, OptionKind::Bool),
    internal("sndtimeo", OptionId::SNDTIMEO, OptionKind::Int32),
    internal("rcvtimeo", OptionId::RCVTIMEO, OptionKind::Int32),
];

/// 配置映射中决定阻塞模式的键，不会下发到传输库。
pub const BLOCKING_KEY: &str = "blocking";

/// 按名称查找可配置选项（忽略大小写）。
pub fn lookup(name: &str) -> Option<&'static OptionSpec> {
    OPTION_TABLE
        .iter()
        .find(|spec| spec.configurable && spec.name.eq_ignore_ascii_case(name))
}

fn table_index(spec: &OptionSpec) -> usize {
    OPTION_TABLE
        .iter()
        .position(|candidate| candidate.id == spec.id)
        .unwrap_or(usize::MAX)
}

/// 传输模式：流式（file）或报文式（live）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransType {
    Live,
    File,
    /// 透传给传输库的其它数值。
    Other(i32),
}

impl TransType {
    pub const fn as_raw(self) -> i32 {
        match self {
            TransType::Live => 0,
            TransType::File => 1,
            TransType::Other(raw) => raw,
        }
    }

    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => TransType::Live,
            1 => TransType::File,
            other => TransType::Other(other),
        }
    }
}

impl FromStr for TransType {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        if token.eq_ignore_ascii_case("live") {
            Ok(TransType::Live)
        } else if token.eq_ignore_ascii_case("file") {
            Ok(TransType::File)
        } else {
            token.parse::<i32>().map(TransType::from_raw).map_err(|_| ())
        }
    }
}

impl fmt::Display for TransType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransType::Live => f.write_str("live"),
            TransType::File => f.write_str("file"),
            TransType::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// 解析后的强类型选项值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Int32(i32),
    Int64(i64),
    Bool(bool),
    String(String),
    TransType(TransType),
}

impl OptionValue {
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Int32(_) => OptionKind::Int32,
            OptionValue::Int64(_) => OptionKind::Int64,
            OptionValue::Bool(_) => OptionKind::Bool,
            OptionValue::String(_) => OptionKind::String,
            OptionValue::TransType(_) => OptionKind::TransType,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OptionValue::Int32(value) => Some(*value),
            OptionValue::TransType(mode) => Some(mode.as_raw()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn to_sockopt(&self) -> SockOptValue {
        match self {
            OptionValue::Int32(value) => SockOptValue::Int(*value),
            OptionValue::Int64(value) => SockOptValue::Int64(*value),
            OptionValue::Bool(value) => SockOptValue::Bool(*value),
            OptionValue::String(value) => SockOptValue::Str(value.clone()),
            OptionValue::TransType(mode) => SockOptValue::Int(mode.as_raw()),
        }
    }

    pub(crate) fn from_sockopt(kind: OptionKind, raw: SockOptValue) -> Option<Self> {
        match (kind, raw) {
            (OptionKind::Int32, SockOptValue::Int(value)) => Some(OptionValue::Int32(value)),
            (OptionKind::TransType, SockOptValue::Int(value)) => {
                Some(OptionValue::TransType(TransType::from_raw(value)))
            }
            (OptionKind::Int64, SockOptValue::Int64(value)) => Some(OptionValue::Int64(value)),
            (OptionKind::Bool, SockOptValue::Bool(value)) => Some(OptionValue::Bool(value)),
            (OptionKind::String, SockOptValue::Str(value)) => Some(OptionValue::String(value)),
            (OptionKind::String, SockOptValue::Bytes(value)) => {
                String::from_utf8(value).ok().map(OptionValue::String)
            }
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int32(value) => write!(f, "{value}"),
            OptionValue::Int64(value) => write!(f, "{value}"),
            OptionValue::Bool(value) => write!(f, "{value}"),
            OptionValue::String(value) => f.write_str(value),
            OptionValue::TransType(mode) => write!(f, "{mode}"),
        }
    }
}

/// 布尔词法：`1/true/yes/on` 与 `0/false/no/off`，忽略大小写。
pub fn parse_bool(raw: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["1", "true", "yes", "on"];
    const FALSE: [&str; 4] = ["0", "false", "no", "off"];
    let token = raw.trim();
    if TRUE.iter().any(|lexeme| token.eq_ignore_ascii_case(lexeme)) {
        Some(true)
    } else if FALSE.iter().any(|lexeme| token.eq_ignore_ascii_case(lexeme)) {
        Some(false)
    } else {
        None
    }
}

impl OptionSpec {
    /// 按声明类型解析字符串值。
    pub fn parse(&self, raw: &str) -> Result<OptionValue, SrtError> {
        let parsed = match self.kind {
            OptionKind::Int32 => raw.trim().parse().ok().map(OptionValue::Int32),
            OptionKind::Int64 => raw.trim().parse().ok().map(OptionValue::Int64),
            OptionKind::Bool => parse_bool(raw).map(OptionValue::Bool),
            OptionKind::String => Some(OptionValue::String(raw.to_owned())),
            OptionKind::TransType => raw.parse().ok().map(OptionValue::TransType),
        };
        parsed.ok_or_else(|| SrtError::InvalidOptionValue {
            name: self.name.to_owned(),
            value: raw.to_owned(),
            expected: self.kind,
        })
    }
}

fn rejected(spec: &OptionSpec) -> impl FnOnce(ApiError) -> SrtError + '_ {
    move |source| SrtError::OptionRejectedByTransport {
        name: spec.name.to_owned(),
        source,
    }
}

/// 按名称解析并写入一个选项。
pub fn apply(api: &dyn SrtApi, fd: Descriptor, name: &str, raw: &str) -> Result<(), SrtError> {
    let spec = lookup(name).ok_or_else(|| SrtError::UnknownOption {
        name: name.to_owned(),
    })?;
    let value = spec.parse(raw)?;
    apply_value(api, fd, spec, &value)
}

/// 按名称读回一个选项。
pub fn read(api: &dyn SrtApi, fd: Descriptor, name: &str) -> Result<OptionValue, SrtError> {
    let spec = lookup(name).ok_or_else(|| SrtError::UnknownOption {
        name: name.to_owned(),
    })?;
    read_value(api, fd, spec)
}

pub(crate) fn apply_value(
    api: &dyn SrtApi,
    fd: Descriptor,
    spec: &OptionSpec,
    value: &OptionValue,
) -> Result<(), SrtError> {
    api.set_option(fd, spec.id, value.to_sockopt())
        .map_err(rejected(spec))
}

pub(crate) fn read_value(
    api: &dyn SrtApi,
    fd: Descriptor,
    spec: &OptionSpec,
) -> Result<OptionValue, SrtError> {
    let raw = api.get_option(fd, spec.id).map_err(rejected(spec))?;
    OptionValue::from_sockopt(spec.kind, raw).ok_or_else(|| SrtError::OptionRejectedByTransport {
        name: spec.name.to_owned(),
        source: ApiError::new(
            ErrorCode::InvalidParam,
            format!("transport returned a value that is not {}", spec.kind),
        ),
    })
}

fn typed_spec(id: OptionId, kind: OptionKind, shown: String) -> Result<&'static OptionSpec, SrtError> {
    let spec = id.spec().ok_or_else(|| SrtError::UnknownOption {
        name: id.to_string(),
    })?;
    if spec.kind.storage() != kind.storage() {
        return Err(SrtError::InvalidOptionValue {
            name: spec.name.to_owned(),
            value: shown,
            expected: spec.kind,
        });
    }
    Ok(spec)
}

/// 按编号写入强类型值（`SetSockOpt*` 系列）。
pub(crate) fn set_typed(api: &dyn SrtApi, fd: Descriptor, id: OptionId, value: OptionValue) -> Result<(), SrtError> {
    let spec = typed_spec(id, value.kind(), value.to_string())?;
    apply_value(api, fd, spec, &value)
}

/// 按编号读回强类型值（`GetSockOpt*` 系列）。
pub(crate) fn get_typed(api: &dyn SrtApi, fd: Descriptor, id: OptionId, kind: OptionKind) -> Result<OptionValue, SrtError> {
    let spec = typed_spec(id, kind, format!("<{kind} read>"))?;
    read_value(api, fd, spec)
}

/// 以原始字节写入字符串类选项，内容可以不是 UTF-8。
pub(crate) fn set_bytes(api: &dyn SrtApi, fd: Descriptor, id: OptionId, value: &[u8]) -> Result<(), SrtError> {
    let spec = typed_spec(id, OptionKind::String, String::from_utf8_lossy(value).into_owned())?;
    api.set_option(fd, spec.id, SockOptValue::Bytes(value.to_vec()))
        .map_err(rejected(spec))
}

/// 以原始字节读回字符串类选项。
pub(crate) fn get_bytes(api: &dyn SrtApi, fd: Descriptor, id: OptionId) -> Result<Vec<u8>, SrtError> {
    let spec = typed_spec(id, OptionKind::String, "<bytes read>".to_owned())?;
    match api.get_option(fd, spec.id).map_err(rejected(spec))? {
        SockOptValue::Str(value) => Ok(value.into_bytes()),
        SockOptValue::Bytes(value) => Ok(value),
        other => Err(SrtError::OptionRejectedByTransport {
            name: spec.name.to_owned(),
            source: ApiError::new(
                ErrorCode::InvalidParam,
                format!("transport returned {other:?} for a byte-array option"),
            ),
        }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ConfiguredOption {
    spec: &'static OptionSpec,
    value: OptionValue,
}

/// 一次性解析完成的套接字配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 先完整解析整张映射、再统一下发，保证“任一值非法则全部不生效”；
/// - 作为 `SrtSocket::with_config` 的输入，也可以通过 serde 从配置文件直接反序列化
///   （启用 `serde` 特性）。
///
/// ## 契约（What）
/// - `blocking` 缺省为 `false`（非阻塞，经多路复用器挂起）；
/// - 同名选项后写覆盖先写；
/// - `apply` 以 `transtype` 优先、其余按选项表顺序写入，结果与映射的迭代顺序无关。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(try_from = "BTreeMap<String, String>")
)]
pub struct SocketConfig {
    blocking: bool,
    options: Vec<ConfiguredOption>,
}

impl SocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从任意 `(名称, 值)` 序列解析配置。
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SrtError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::new();
        for (name, raw) in pairs {
            config.set(name.as_ref(), raw.as_ref())?;
        }
        Ok(config)
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_option(mut self, name: &str, raw: &str) -> Result<Self, SrtError> {
        self.set(name, raw)?;
        Ok(self)
    }

    /// 解析并记录一个键值；`blocking` 只影响本地阻塞模式。
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), SrtError> {
        if name.eq_ignore_ascii_case(BLOCKING_KEY) {
            self.blocking = parse_bool(raw).ok_or_else(|| SrtError::InvalidOptionValue {
                name: BLOCKING_KEY.to_owned(),
                value: raw.to_owned(),
                expected: OptionKind::Bool,
            })?;
            return Ok(());
        }
        let spec = lookup(name).ok_or_else(|| SrtError::UnknownOption {
            name: name.to_owned(),
        })?;
        let value = spec.parse(raw)?;
        match self.options.iter_mut().find(|entry| entry.spec.id == spec.id) {
            Some(entry) => entry.value = value,
            None => self.options.push(ConfiguredOption { spec, value }),
        }
        Ok(())
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.options
            .iter()
            .find(|entry| entry.spec.name.eq_ignore_ascii_case(name))
            .map(|entry| &entry.value)
    }

    pub fn options(&self) -> impl Iterator<Item = (&'static OptionSpec, &OptionValue)> + '_ {
        self.options.iter().map(|entry| (entry.spec, &entry.value))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub(crate) fn apply(&self, api: &dyn SrtApi, fd: Descriptor) -> Result<(), SrtError> {
        let mut ordered: Vec<&ConfiguredOption> = self.options.iter().collect();
        ordered.sort_by_key(|entry| table_index(entry.spec));
        for entry in ordered {
            apply_value(api, fd, entry.spec, &entry.value)?;
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, String>> for SocketConfig {
    type Error = SrtError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(map)
    }
}

impl TryFrom<&HashMap<String, String>> for SocketConfig {
    type Error = SrtError;

    fn try_from(map: &HashMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_names_and_ids_are_unique() {
        for (index, spec) in OPTION_TABLE.iter().enumerate() {
            for other in &OPTION_TABLE[index + 1..] {
                assert_ne!(spec.name, other.name);
                assert_ne!(spec.id, other.id);
            }
        }
        assert_eq!(OPTION_TABLE[0].id, OptionId::TRANSTYPE);
    }

    #[test]
    fn lookup_ignores_case_and_hides_internal_options() {
        assert_eq!(lookup("Linger").map(|spec| spec.id), Some(OptionId::LINGER));
        assert!(lookup("rcvsyn").is_none());
        assert!(lookup("no-such-option").is_none());
        assert_eq!(OptionId::RCVSYN.spec().map(|spec| spec.name), Some("rcvsyn"));
    }

    #[test]
    fn parses_each_declared_kind() {
        let parse = |name: &str, raw: &str| lookup(name).expect("known option").parse(raw);
        assert_eq!(parse("linger", "1000").ok(), Some(OptionValue::Int32(1000)));
        assert_eq!(parse("maxbw", "300000").ok(), Some(OptionValue::Int64(300_000)));
        assert_eq!(parse("enforcedencryption", "0").ok(), Some(OptionValue::Bool(false)));
        assert_eq!(parse("messageapi", "TRUE").ok(), Some(OptionValue::Bool(true)));
        assert_eq!(
            parse("passphrase", "11111111111").ok(),
            Some(OptionValue::String("11111111111".into()))
        );
        assert_eq!(
            parse("transtype", "file").ok(),
            Some(OptionValue::TransType(TransType::File))
        );
        assert_eq!(
            parse("transtype", "3").ok(),
            Some(OptionValue::TransType(TransType::Other(3)))
        );
    }

    #[test]
    fn invalid_values_name_option_and_input() {
        let err = lookup("pbkeylen")
            .expect("known option")
            .parse("thirty-two")
            .expect_err("not an integer");
        match err {
            SrtError::InvalidOptionValue {
                name,
                value,
                expected,
            } => {
                assert_eq!(name, "pbkeylen");
                assert_eq!(value, "thirty-two");
                assert_eq!(expected, OptionKind::Int32);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(lookup("tsbpdmode").expect("known").parse("maybe").is_err());
        assert!(lookup("transtype").expect("known").parse("stream").is_err());
    }

    #[test]
    fn config_is_all_or_nothing() {
        let err = SocketConfig::from_pairs([("blocking", "1"), ("latency", "abc")])
            .expect_err("latency is not an integer");
        assert!(matches!(err, SrtError::InvalidOptionValue { .. }));

        let err = SocketConfig::from_pairs([("bogus", "1")]).expect_err("unknown key");
        assert!(matches!(err, SrtError::UnknownOption { name } if name == "bogus"));

        let config = SocketConfig::from_pairs([("blocking", "true"), ("latency", "200")])
            .expect("valid config");
        assert!(config.blocking());
        assert_eq!(config.get("latency"), Some(&OptionValue::Int32(200)));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn later_values_replace_earlier_ones() {
        let config = SocketConfig::new()
            .with_option("latency", "100")
            .and_then(|config| config.with_option("LATENCY", "250"))
            .expect("valid values");
        assert_eq!(config.len(), 1);
        assert_eq!(config.get("latency"), Some(&OptionValue::Int32(250)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_from_string_map() {
        let config: SocketConfig =
            serde_json::from_str(r#"{"blocking":"0","transtype":"file","maxbw":"-1"}"#)
                .expect("valid json config");
        assert!(!config.blocking());
        assert_eq!(
            config.get("transtype"),
            Some(&OptionValue::TransType(TransType::File))
        );
        assert_eq!(config.get("maxbw"), Some(&OptionValue::Int64(-1)));

        let err = serde_json::from_str::<SocketConfig>(r#"{"latency":"x"}"#)
            .expect_err("latency must be numeric");
        assert!(err.to_string().contains("latency"));
    }

    proptest! {
        #[test]
        fn int32_values_parse_exactly(value in any::<i32>()) {
            let parsed = lookup("latency").expect("known").parse(&value.to_string());
            prop_assert_eq!(parsed.ok(), Some(OptionValue::Int32(value)));
        }

        #[test]
        fn non_numeric_text_is_rejected_for_integers(raw in "[a-zA-Z_ ]{1,12}") {
            let parsed = lookup("linger").expect("known").parse(&raw);
            let is_invalid_value = matches!(parsed, Err(SrtError::InvalidOptionValue { .. }));
            prop_assert!(is_invalid_value);
        }
    }
}
