//! 外部コラボレーター（ユーザー解決・IP所在地）
//!
//! どちらも同期・非ブロッキングで、ファイナライザから呼ばれる。

use crate::audit::types::CurrentUser;
use crate::common::ip::normalize_ip;
use axum::http::Extensions;
use std::net::IpAddr;

/// 現在のユーザーを解決する
pub trait IdentityResolver: Send + Sync {
    /// response extensionsからユーザーを解決する
    ///
    /// ハンドラーがpanicした場合など、レスポンスがない場合は `None` が渡される。
    /// 未認証は `id == 0` のユーザーで表す。
    fn current_user(&self, extensions: Option<&Extensions>) -> CurrentUser;
}

/// 認証レイヤーがresponse extensionsに格納した [`CurrentUser`] を読む
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentityResolver;

impl IdentityResolver for ExtensionIdentityResolver {
    fn current_user(&self, extensions: Option<&Extensions>) -> CurrentUser {
        extensions
            .and_then(|ext| ext.get::<CurrentUser>())
            .cloned()
            .unwrap_or_default()
    }
}

/// IPアドレスの所在地を解決する
pub trait IpLocator: Send + Sync {
    /// 所在地ラベルを返す
    fn locate(&self, ip: &str) -> String;
}

/// ローカル判定のみ行うロケーター
///
/// ループバック・プライベート・リンクローカルは `"LAN"`、それ以外は `"unknown"`。
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIpLocator;

/// ローカルネットワークの所在地ラベル
pub const LOCATION_LAN: &str = "LAN";

/// 不明な所在地ラベル
pub const LOCATION_UNKNOWN: &str = "unknown";

impl IpLocator for LocalIpLocator {
    fn locate(&self, ip: &str) -> String {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return LOCATION_UNKNOWN.to_string();
        };
        let local = match normalize_ip(addr) {
            IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    // fc00::/7 (unique local), fe80::/10 (link local)
                    || (v6.segments()[0] & 0xfe00) == 0xfc00
                    || (v6.segments()[0] & 0xffc0) == 0xfe80
            }
        };
        if local {
            LOCATION_LAN.to_string()
        } else {
            LOCATION_UNKNOWN.to_string()
        }
    }
}
