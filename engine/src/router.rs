use chrono::{NaiveDate, Utc};
use common::{Endpoint, Market, Task, TaskType};
use errors::Result;
use serde_json::Value;
use utils::date_utils;

const XUEQIU_BASE: &str = "https://stock.xueqiu.com";
const XUEQIU_ORIGIN: &str = "https://xueqiu.com";
const YAHOO_BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const YAHOO_ORIGIN: &str = "https://finance.yahoo.com";
const TENCENT_HK_KLINE: &str = "https://web.ifzq.gtimg.cn/appstock/app/hkfqkline/get";
const TENCENT_ORIGIN: &str = "https://gu.qq.com";

const KLINE_INDICATOR: &str = "kline,pe,pb,ps,pcf,market_capital,agt,ggt,balance";
const REALTIME_BAR_COUNT: i64 = 100;
const BACKFILL_BAR_COUNT: i64 = 1000;
const HK_BAR_COUNT: i64 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Xueqiu,
    Yahoo,
    TencentHk,
}

/// A fully-resolved upstream call for one task: which provider adapter to
/// validate with, the concrete URL and query set, and the inclusive date
/// window backfill results must be trimmed to.
#[derive(Debug, Clone)]
pub struct Route {
    pub provider: Provider,
    pub url: String,
    pub method: String,
    pub params: Vec<(String, String)>,
    pub origin: String,
    pub date_window: Option<(NaiveDate, NaiveDate)>,
}

/// Pure dispatch on `(market, task_type)`, with explicit CN endpoint tags
/// taking precedence. Unknown pairs are a terminal `unsupported_task`.
pub struct ProviderRouter;

impl ProviderRouter {
    pub fn resolve(task: &Task) -> Result<Route> {
        // An explicit non-kline endpoint tag overrides the task-type route.
        if task.market == Market::CN {
            if let Some(endpoint) = task.endpoint.filter(|e| *e != Endpoint::Kline) {
                return Ok(cn_endpoint_route(task, endpoint));
            }
        }

        match (task.market, task.task_type) {
            (
                Market::CN,
                TaskType::Realtime1m | TaskType::Realtime5m | TaskType::Realtime15m,
            ) => Ok(cn_kline_realtime(task)),
            (Market::CN, TaskType::Backfill15m | TaskType::Backfill1d) => cn_kline_backfill(task),
            (Market::US, TaskType::UsRealtime1m) => Ok(us_chart(task)),
            (Market::HK, TaskType::HkRealtime1m) => Ok(hk_kline(task)),
            (market, task_type) => Err(errors::Error::unsupported_task(format!(
                "{market}+{task_type}"
            ))),
        }
    }
}

/// Xueqiu bar periods differ from scheduler naming for the coarser frames.
fn map_period(period: &str) -> &str {
    match period {
        "1m" | "5m" | "15m" | "30m" => period,
        "1h" => "60m",
        "1d" => "day",
        "1w" => "week",
        "1M" => "month",
        _ => "day",
    }
}

fn task_period(task: &Task) -> &str {
    task.payload
        .period
        .as_deref()
        .or_else(|| task.task_type.implied_period())
        .unwrap_or("1d")
}

fn method_of(task: &Task) -> String {
    task.payload
        .method
        .as_deref()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "GET".to_string())
}

fn cn_kline_realtime(task: &Task) -> Route {
    let count = task.payload.count.unwrap_or(REALTIME_BAR_COUNT).abs();
    let params = vec![
        ("symbol".to_string(), task.symbol.clone()),
        (
            "begin".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ),
        (
            "period".to_string(),
            map_period(task_period(task)).to_string(),
        ),
        ("type".to_string(), "before".to_string()),
        ("count".to_string(), format!("-{count}")),
        ("indicator".to_string(), KLINE_INDICATOR.to_string()),
    ];
    Route {
        provider: Provider::Xueqiu,
        url: format!("{XUEQIU_BASE}{}", xueqiu_path(Endpoint::Kline)),
        method: method_of(task),
        params,
        origin: XUEQIU_ORIGIN.to_string(),
        date_window: None,
    }
}

fn cn_kline_backfill(task: &Task) -> Result<Route> {
    let start_raw = task
        .payload
        .start_date
        .as_deref()
        .ok_or_else(|| errors::Error::invalid_task("backfill without start_date"))?;
    let end_raw = task
        .payload
        .end_date
        .as_deref()
        .ok_or_else(|| errors::Error::invalid_task("backfill without end_date"))?;
    let start = date_utils::parse_date(start_raw)?;
    let end = date_utils::parse_date(end_raw)?;
    if start > end {
        return Err(errors::Error::invalid_task(format!(
            "backfill window inverted: {start_raw}..{end_raw}"
        )));
    }

    let count = task.payload.count.unwrap_or(BACKFILL_BAR_COUNT).abs();
    let params = vec![
        ("symbol".to_string(), task.symbol.clone()),
        (
            "begin".to_string(),
            date_utils::end_of_day_millis(end).to_string(),
        ),
        (
            "period".to_string(),
            map_period(task_period(task)).to_string(),
        ),
        ("type".to_string(), "before".to_string()),
        ("count".to_string(), format!("-{count}")),
        ("indicator".to_string(), KLINE_INDICATOR.to_string()),
    ];
    Ok(Route {
        provider: Provider::Xueqiu,
        url: format!("{XUEQIU_BASE}{}", xueqiu_path(Endpoint::Kline)),
        method: method_of(task),
        params,
        origin: XUEQIU_ORIGIN.to_string(),
        date_window: Some((start, end)),
    })
}

fn cn_endpoint_route(task: &Task, endpoint: Endpoint) -> Route {
    let mut params: Vec<(String, String)> = task
        .payload
        .params
        .as_ref()
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), param_value(v)))
                .collect()
        })
        .unwrap_or_default();
    if !params.iter().any(|(k, _)| k == "symbol") {
        params.push(("symbol".to_string(), task.symbol.clone()));
    }

    Route {
        provider: Provider::Xueqiu,
        url: format!("{XUEQIU_BASE}{}", xueqiu_path(endpoint)),
        method: method_of(task),
        params,
        origin: XUEQIU_ORIGIN.to_string(),
        date_window: None,
    }
}

fn us_chart(task: &Task) -> Route {
    let params = vec![
        (
            "interval".to_string(),
            yahoo_interval(task_period(task)).to_string(),
        ),
        ("range".to_string(), "1d".to_string()),
        ("includePrePost".to_string(), "true".to_string()),
    ];
    Route {
        provider: Provider::Yahoo,
        url: format!("{YAHOO_BASE}/{}", task.symbol),
        method: method_of(task),
        params,
        origin: YAHOO_ORIGIN.to_string(),
        date_window: None,
    }
}

fn hk_kline(task: &Task) -> Route {
    let count = task.payload.count.unwrap_or(HK_BAR_COUNT).abs();
    let params = vec![(
        "param".to_string(),
        format!("{},day,,,{count},qfq", task.symbol),
    )];
    Route {
        provider: Provider::TencentHk,
        url: TENCENT_HK_KLINE.to_string(),
        method: method_of(task),
        params,
        origin: TENCENT_ORIGIN.to_string(),
        date_window: None,
    }
}

fn xueqiu_path(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::Kline => "/v5/stock/chart/kline.json",
        Endpoint::Quote => "/v5/stock/quote.json",
        Endpoint::BatchQuote => "/v5/stock/batch/quote.json",
        Endpoint::Minute => "/v5/stock/chart/minute.json",
        Endpoint::Detail => "/v5/stock/f10/cn/company.json",
    }
}

fn yahoo_interval(period: &str) -> &str {
    match period {
        "1m" | "5m" | "15m" | "1h" | "1d" => period,
        _ => "1d",
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TaskPayload;
    use serde_json::json;

    fn task(task_type: TaskType, market: Market) -> Task {
        Task {
            task_id: "t1".to_string(),
            task_type,
            market,
            symbol: "SH600000".to_string(),
            endpoint: None,
            payload: TaskPayload::default(),
            enqueued_at: None,
            attempt: 1,
            timeout_s: None,
        }
    }

    fn param<'a>(route: &'a Route, key: &str) -> Option<&'a str> {
        route
            .params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_cn_realtime_kline_route() {
        let route = ProviderRouter::resolve(&task(TaskType::Realtime1m, Market::CN)).unwrap();
        assert_eq!(route.provider, Provider::Xueqiu);
        assert!(route.url.ends_with("/v5/stock/chart/kline.json"));
        assert_eq!(param(&route, "symbol"), Some("SH600000"));
        assert_eq!(param(&route, "period"), Some("1m"));
        assert_eq!(param(&route, "type"), Some("before"));
        assert_eq!(param(&route, "count"), Some("-100"));
        assert_eq!(param(&route, "indicator"), Some(KLINE_INDICATOR));
        assert!(route.date_window.is_none());
    }

    #[test]
    fn test_period_mapping() {
        assert_eq!(map_period("1m"), "1m");
        assert_eq!(map_period("30m"), "30m");
        assert_eq!(map_period("1h"), "60m");
        assert_eq!(map_period("1d"), "day");
        assert_eq!(map_period("1w"), "week");
        assert_eq!(map_period("1M"), "month");
        assert_eq!(map_period("2y"), "day");
    }

    #[test]
    fn test_payload_period_overrides_task_type() {
        let mut t = task(TaskType::Realtime1m, Market::CN);
        t.payload.period = Some("1h".to_string());
        let route = ProviderRouter::resolve(&t).unwrap();
        assert_eq!(param(&route, "period"), Some("60m"));
    }

    #[test]
    fn test_backfill_route_has_window_and_end_anchored_begin() {
        let mut t = task(TaskType::Backfill1d, Market::CN);
        t.payload.start_date = Some("2024-01-10".to_string());
        t.payload.end_date = Some("2024-01-12".to_string());
        let route = ProviderRouter::resolve(&t).unwrap();

        assert_eq!(param(&route, "period"), Some("day"));
        assert_eq!(param(&route, "count"), Some("-1000"));
        let (start, end) = route.date_window.unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 12).unwrap());
        // begin anchors at the end of the last requested day.
        let expected_begin = date_utils::end_of_day_millis(end).to_string();
        assert_eq!(param(&route, "begin"), Some(expected_begin.as_str()));
    }

    #[test]
    fn test_backfill_requires_valid_window() {
        let mut t = task(TaskType::Backfill15m, Market::CN);
        assert!(ProviderRouter::resolve(&t)
            .unwrap_err()
            .is_invalid_task());

        t.payload.start_date = Some("2024-01-12".to_string());
        t.payload.end_date = Some("2024-01-10".to_string());
        assert!(ProviderRouter::resolve(&t)
            .unwrap_err()
            .is_invalid_task());
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let mut t = task(TaskType::Realtime1m, Market::CN);
        t.endpoint = Some(Endpoint::Quote);
        t.payload.params = Some(
            json!({"extend": "detail"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let route = ProviderRouter::resolve(&t).unwrap();
        assert!(route.url.ends_with("/v5/stock/quote.json"));
        assert_eq!(param(&route, "extend"), Some("detail"));
        assert_eq!(param(&route, "symbol"), Some("SH600000"));
    }

    #[test]
    fn test_explicit_kline_endpoint_still_routes_by_task_type() {
        let mut t = task(TaskType::Realtime5m, Market::CN);
        t.endpoint = Some(Endpoint::Kline);
        let route = ProviderRouter::resolve(&t).unwrap();
        assert_eq!(param(&route, "period"), Some("5m"));
    }

    #[test]
    fn test_us_and_hk_routes() {
        let route = ProviderRouter::resolve(&task(TaskType::UsRealtime1m, Market::US)).unwrap();
        assert_eq!(route.provider, Provider::Yahoo);
        assert!(route.url.ends_with("/chart/SH600000"));
        assert_eq!(param(&route, "interval"), Some("1m"));

        let route = ProviderRouter::resolve(&task(TaskType::HkRealtime1m, Market::HK)).unwrap();
        assert_eq!(route.provider, Provider::TencentHk);
        assert_eq!(param(&route, "param"), Some("SH600000,day,,,320,qfq"));
    }

    #[test]
    fn test_unknown_pairs_are_unsupported() {
        for (market, task_type) in [
            (Market::US, TaskType::Realtime1m),
            (Market::HK, TaskType::Backfill1d),
            (Market::CN, TaskType::UsRealtime1m),
            (Market::CN, TaskType::HkRealtime1m),
        ] {
            let err = ProviderRouter::resolve(&task(task_type, market)).unwrap_err();
            assert!(err.is_unsupported_task(), "{market}+{task_type}");
        }
    }
}
