//! Prometheus 计数器, 未启用 `metrics` 特性时为空操作

#[cfg(feature = "metrics")]
mod prom {
    use lazy_static::lazy_static;
    use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

    lazy_static! {
        pub static ref TRAVERSALS_DISPATCHED: Option<IntCounter> = register_int_counter!(
            "rulechain_traversals_dispatched_total",
            "Rule chain traversals started by the dispatcher"
        )
        .ok();
        pub static ref NODE_ERRORS: Option<IntCounterVec> = register_int_counter_vec!(
            "rulechain_node_errors_total",
            "Rule chain traversals that ended with a node error",
            &["node_type"]
        )
        .ok();
    }
}

pub fn record_dispatch() {
    #[cfg(feature = "metrics")]
    {
        if let Some(counter) = prom::TRAVERSALS_DISPATCHED.as_ref() {
            counter.inc();
        }
    }
}

pub fn record_node_error(node_type: &str) {
    #[cfg(feature = "metrics")]
    {
        if let Some(counter) = prom::NODE_ERRORS.as_ref() {
            counter.with_label_values(&[node_type]).inc();
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = node_type;
    }
}
