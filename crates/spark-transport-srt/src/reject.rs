//! 拒绝原因（Reject Reason）编码与文案查询。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 握手被拒绝时，连接方只能拿到一个整数；本模块负责把它还原成可读文案，
//!   并区分“传输库内部原因”“预定义的应用原因”“应用自定义原因”三段。
//! - 三段之间的边界并不能从行为中观测到，因此以 [`RejectCodeRange`] 显式配置，
//!   默认值与 libsrt 一致（`SRT_REJC_PREDEFINED = 1000`、`SRT_REJC_USERDEFINED = 2000`）。
//!
//! ## 契约 (What)
//! - [`code_to_string`] 对任意 `i32` 都返回文案，绝不失败；
//! - 应用在监听回调中只能设置 `>= predefined` 的原因码，内部段保留给传输库。

use std::{borrow::Cow, fmt};

/// 握手拒绝原因码。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RejectReason(i32);

impl RejectReason {
    // 传输库内部原因（`SRT_REJ_*`）。
    pub const UNKNOWN: Self = Self(0);
    pub const SYSTEM: Self = Self(1);
    pub const PEER: Self = Self(2);
    pub const RESOURCE: Self = Self(3);
    pub const ROGUE: Self = Self(4);
    pub const BACKLOG: Self = Self(5);
    pub const IPE: Self = Self(6);
    pub const CLOSE: Self = Self(7);
    pub const VERSION: Self = Self(8);
    pub const RDVCOOKIE: Self = Self(9);
    pub const BADSECRET: Self = Self(10);
    pub const UNSECURE: Self = Self(11);
    pub const MESSAGEAPI: Self = Self(12);
    pub const CONGESTION: Self = Self(13);
    pub const FILTER: Self = Self(14);
    pub const GROUP: Self = Self(15);
    pub const TIMEOUT: Self = Self(16);
    pub const CRYPTO: Self = Self(17);

    // 预定义的应用原因（`SRT_REJX_*`，仿照 HTTP 状态码排布）。
    pub const FALLBACK: Self = Self(1000);
    pub const BAD_REQUEST: Self = Self(1400);
    pub const UNAUTHORIZED: Self = Self(1401);
    pub const OVERLOAD: Self = Self(1402);
    pub const FORBIDDEN: Self = Self(1403);
    pub const NOT_FOUND: Self = Self(1404);
    pub const BAD_MODE: Self = Self(1405);
    pub const UNACCEPTABLE: Self = Self(1406);
    pub const CONFLICT: Self = Self(1409);
    pub const NOT_SUP_MEDIA: Self = Self(1415);
    pub const LOCKED: Self = Self(1423);
    pub const FAILED_DEPEND: Self = Self(1424);
    pub const ISE: Self = Self(1500);
    pub const UNIMPLEMENTED: Self = Self(1501);
    pub const GATEWAY: Self = Self(1502);
    pub const DOWN: Self = Self(1503);
    pub const VERSION_MISMATCH: Self = Self(1505);
    pub const NO_ROOM: Self = Self(1507);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// 在默认分段下构造应用自定义原因：`user_defined_base + offset`。
    pub const fn application(offset: i32) -> Self {
        Self(RejectCodeRange::DEFAULT.application.saturating_add(offset))
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn class(self) -> RejectClass {
        RejectCodeRange::default().classify(self.0)
    }

    pub fn describe(self) -> Cow<'static, str> {
        RejectCodeRange::default().describe(self.0)
    }
}

impl From<i32> for RejectReason {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.describe(), self.0)
    }
}

/// 原因码所在分段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectClass {
    /// 传输库内部原因。
    Internal,
    /// 预定义的应用原因。
    Predefined,
    /// 应用自定义原因。
    Application,
    /// 负数等不在任何分段中的值。
    Unknown,
}

/// 内部/预定义/自定义三段原因码的边界。
///
/// - `predefined`：预定义段起点，小于它的非负值属于传输库内部；
/// - `application`：自定义段起点，必须大于 `predefined`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RejectCodeRange {
    predefined: i32,
    application: i32,
}

impl RejectCodeRange {
    pub const DEFAULT: Self = Self {
        predefined: 1000,
        application: 2000,
    };

    /// 构造自定义分段；`0 < predefined < application` 不成立时返回 `None`。
    pub const fn new(predefined: i32, application: i32) -> Option<Self> {
        if predefined > 0 && predefined < application {
            Some(Self {
                predefined,
                application,
            })
        } else {
            None
        }
    }

    pub const fn predefined(&self) -> i32 {
        self.predefined
    }

    pub const fn application(&self) -> i32 {
        self.application
    }

    pub const fn classify(&self, code: i32) -> RejectClass {
        if code < 0 {
            RejectClass::Unknown
        } else if code < self.predefined {
            RejectClass::Internal
        } else if code < self.application {
            RejectClass::Predefined
        } else {
            RejectClass::Application
        }
    }

    /// 应用是否允许把 `code` 作为拒绝原因写入候选套接字。
    pub const fn is_settable(&self, code: i32) -> bool {
        code >= self.predefined
    }

    /// 将原因码转换为文案，对未知值返回通用描述。
    pub fn describe(&self, code: i32) -> Cow<'static, str> {
        match self.classify(code) {
            RejectClass::Internal => match internal_text(code) {
                Some(text) => Cow::Borrowed(text),
                None => Cow::Owned(format!("unknown internal rejection reason (code {code})")),
            },
            RejectClass::Predefined => {
                match predefined_text(code.saturating_sub(self.predefined)) {
                    Some(text) => Cow::Borrowed(text),
                    None => Cow::Owned(format!("predefined rejection reason (code {code})")),
                }
            }
            RejectClass::Application => Cow::Owned(format!(
                "application-defined rejection reason {} (code {code})",
                code.saturating_sub(self.application)
            )),
            RejectClass::Unknown => Cow::Owned(format!("unknown rejection reason (code {code})")),
        }
    }
}

impl Default for RejectCodeRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 在默认分段下查询原因码文案。
pub fn code_to_string(code: i32) -> Cow<'static, str> {
    RejectCodeRange::DEFAULT.describe(code)
}

fn internal_text(code: i32) -> Option<&'static str> {
    let text = match code {
        0 => "unknown or erroneous",
        1 => "error in system calls",
        2 => "peer rejected connection",
        3 => "resource allocation failure",
        4 => "rogue peer or incorrect parameters",
        5 => "listener's backlog exceeded",
        6 => "internal program error",
        7 => "socket is being closed",
        8 => "peer version too old",
        9 => "rendezvous-mode cookie collision",
        10 => "incorrect passphrase",
        11 => "password required or unexpected",
        12 => "message API / stream API collision",
        13 => "congestion controller type collision",
        14 => "packet filter settings error",
        15 => "group settings collision",
        16 => "connection timeout",
        17 => "crypto mode collision",
        _ => return None,
    };
    Some(text)
}

fn predefined_text(offset: i32) -> Option<&'static str> {
    let text = match offset {
        0 => "fallback rejection",
        400 => "bad request",
        401 => "unauthorized",
        402 => "overloaded",
        403 => "forbidden",
        404 => "not found",
        405 => "bad mode",
        406 => "unacceptable",
        409 => "conflict",
        415 => "unsupported media",
        423 => "locked",
        424 => "failed dependency",
        500 => "internal server error",
        501 => "unimplemented",
        502 => "gateway error",
        503 => "service down",
        505 => "version mismatch",
        507 => "no room",
        _ => return None,
    };
    Some(text)
}
