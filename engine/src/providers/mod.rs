pub mod tencent;
pub mod xueqiu;
pub mod yahoo;

pub use tencent::TencentHkAdapter;
pub use xueqiu::XueqiuAdapter;
pub use yahoo::YahooAdapter;

use crate::router::Provider;
use downloader::ProviderAdapter;

static XUEQIU: XueqiuAdapter = XueqiuAdapter;
static YAHOO: YahooAdapter = YahooAdapter;
static TENCENT_HK: TencentHkAdapter = TencentHkAdapter;

pub fn adapter_for(provider: Provider) -> &'static dyn ProviderAdapter {
    match provider {
        Provider::Xueqiu => &XUEQIU,
        Provider::Yahoo => &YAHOO,
        Provider::TencentHk => &TENCENT_HK,
    }
}
