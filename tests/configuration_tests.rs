//! Tests for defaults, parameter binding and configuration introspection

use memoist::{
    call_args, defaults, fresh_defaults, BackingCache, CacheClass, CacheDescriptor, CacheParams, CallArgs,
    Capacity, ConfigValue, ConfigurationError, Decorate, KeyFunction, TraceFilter,
};
use serial_test::serial;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

static CALL_COUNT_1: AtomicU32 = AtomicU32::new(0);

#[test]
#[serial]
fn test_global_defaults_apply_to_later_decorations() {
    defaults().reset();
    defaults().set("typed", true);
    defaults().set("max_size", 4_usize);

    let echo = Decorate::function()
        .build("echo", &["x"], |args: &CallArgs| {
            CALL_COUNT_1.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{:?}", args.get(0)))
        })
        .unwrap();
    defaults().reset();

    assert!(echo.config().typed);
    echo.call(&call_args![1]).unwrap();
    echo.call(&call_args![1.0]).unwrap();
    assert_eq!(CALL_COUNT_1.load(Ordering::SeqCst), 2);
    assert_eq!(echo.cache_info(None).unwrap().max_size, Capacity::Bounded(4));
}

#[test]
#[serial]
fn test_global_unset_cache_class_default() {
    defaults().reset();
    defaults().set("cache_class_for_unset", CacheClass::Unbounded);

    let squared = Decorate::function()
        .cache_class(ConfigValue::Unset)
        .build("squared", &["n"], |args: &CallArgs| Ok(args.int(0)? * args.int(0)?))
        .unwrap();
    defaults().reset();

    let params = squared.cache_parameters(None).unwrap();
    assert_eq!(params.cache.class, CacheClass::Unbounded);
    assert_eq!(squared.cache_info(None).unwrap().max_size, Capacity::Unbounded);
}

#[test]
#[serial]
fn test_trace_filter_setting() {
    defaults().reset();
    defaults().set_trace_filter(TraceFilter::disabled());
    let failing = Decorate::function()
        .exceptions(true)
        .build("failing", &[], |_: &CallArgs| -> Result<(), memoist::Fault> {
            Err(memoist::Fault::new("ValueError", "bad"))
        })
        .unwrap();
    defaults().reset();

    let fault = failing.call(&CallArgs::new()).unwrap_err().into_fault().unwrap();
    // nothing stripped: the engine frames stay in front of the origin
    assert!(fault.trace().len() > 1);
    assert_eq!(fault.origin().unwrap().file(), file!());
}

#[test]
fn test_positional_configuration() {
    let f = Decorate::function()
        .with_defaults(fresh_defaults())
        .arg(8_usize)
        .arg(Duration::from_secs(30))
        .arg(true)
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap();

    let config = f.config();
    assert_eq!(config.max_size, Capacity::Bounded(8));
    assert_eq!(config.time_to_live, Some(Duration::from_secs(30)));
    assert!(config.typed);
}

#[test]
fn test_strict_binding_rejects_unknown_parameters() {
    let err = Decorate::function()
        .with_defaults(fresh_defaults())
        .strict(true)
        .set("maxsize", 3_usize)
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap_err();
    assert_eq!(err, ConfigurationError::UnexpectedKeyword("maxsize".to_string()));

    let lenient = Decorate::function()
        .with_defaults(fresh_defaults())
        .set("maxsize", 3_usize)
        .build("f", &["n"], |args: &CallArgs| args.int(0));
    assert!(lenient.is_ok());
}

#[test]
fn test_strict_binding_rejects_excess_positional() {
    let mut decorate = Decorate::function().with_defaults(fresh_defaults()).strict(true);
    for _ in 0..10 {
        decorate = decorate.arg(ConfigValue::Unset);
    }
    let err = decorate
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::UnexpectedPositional {
            index: 9,
            declared: 9
        }
    );
}

#[test]
fn test_invalid_value_is_a_configuration_error() {
    let err = Decorate::function()
        .with_defaults(fresh_defaults())
        .cache_class("mru")
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InvalidValue { ref name, .. } if name == "cache_class"
    ));
}

#[test]
fn test_configuration_reports_relevant_parameters() {
    let f = Decorate::function()
        .with_defaults(fresh_defaults())
        .cache_class(CacheClass::Ttl)
        .time_to_live(Duration::from_secs(5))
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap();

    let configuration = f.configuration();
    let names: Vec<&str> = configuration.names().collect();
    assert_eq!(names, vec!["cache", "max_size", "time_to_live", "typed", "exceptions"]);

    let Some(ConfigValue::Cache(descriptor)) = configuration.get("cache") else {
        panic!("cache entry missing");
    };
    assert_eq!(descriptor.class, CacheClass::Ttl);
    assert_eq!(descriptor.params.time_to_live, Some(Duration::from_secs(5)));

    let keyed = Decorate::function()
        .with_defaults(fresh_defaults())
        .key(KeyFunction::Typed)
        .build("g", &["n"], |args: &CallArgs| args.int(0))
        .unwrap();
    assert!(keyed.configuration().contains("key"));
    assert!(!keyed.configuration().contains("typed"));
}

#[test]
fn test_descriptor_builds_an_equivalent_cache() {
    let f = Decorate::function()
        .with_defaults(fresh_defaults())
        .cache_class(CacheClass::Lfu)
        .max_size(3_usize)
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap();
    f.call(&call_args![1]).unwrap();

    let descriptor = f.cache_parameters(None).unwrap().cache;
    let copy = descriptor.instantiate();
    assert_eq!(copy.max_size(), Capacity::Bounded(3));
    assert_eq!(copy.current_size(), 0);
}

#[test]
fn test_cache_parameters_serialize() {
    let f = Decorate::function()
        .with_defaults(fresh_defaults())
        .typed(true)
        .cache_class(CacheClass::Ttl)
        .max_size(ConfigValue::Unset)
        .build("f", &["n"], |args: &CallArgs| args.int(0))
        .unwrap();

    let json = serde_json::to_value(f.cache_parameters(None).unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "typed": true,
            "class": "ttl",
            "max_size": null,
            "time_to_live": 600.0,
            "lock": "reentrant"
        })
    );

    let descriptor: CacheDescriptor = serde_json::from_value(serde_json::json!({
        "class": "fifo",
        "max_size": 10
    }))
    .unwrap();
    assert_eq!(
        descriptor,
        CacheDescriptor::new(CacheClass::Fifo, CacheParams::new(Capacity::Bounded(10), None))
    );
}
