mod common;

use std::{cell::RefCell, rc::Rc};

use moondash::{
    Capture, ConsoleOut, DiagnosticKind, ErrorConvention, Evaluation, Host, Namespace, NativeError,
    capabilities::{
        self, Devices,
        bus::SimulatedBus,
        display::{self, DisplayDriver, Font, Framebuffer},
        network::{HttpResponse, Method, SimulatedStation, StaticHttp},
        touch::{ScriptedTouch, TouchSample},
    },
    config::{DeviceConfig, NetworkEntry, RuntimeConfig},
};

struct Rig {
    host: Host,
    display: Rc<RefCell<Framebuffer>>,
    bus: Rc<RefCell<SimulatedBus>>,
    touch: Rc<RefCell<ScriptedTouch>>,
    http: Rc<StaticHttp>,
}

fn rig_with(touch: ScriptedTouch, http: StaticHttp, config: DeviceConfig) -> Rig {
    let host = Host::initialize(&RuntimeConfig::default(), ConsoleOut::new(Capture::new()))
        .expect("runtime");
    let display = Rc::new(RefCell::new(Framebuffer::default()));
    let bus = Rc::new(RefCell::new(SimulatedBus::new()));
    let touch = Rc::new(RefCell::new(touch));
    let http = Rc::new(http);
    let devices = Devices {
        display: display.clone(),
        bus: bus.clone(),
        touch: touch.clone(),
        station: Rc::new(RefCell::new(SimulatedStation::new(config.networks.clone()))),
        http: http.clone(),
    };
    capabilities::install(&host, &devices, &config).expect("capabilities install");
    Rig {
        host,
        display,
        bus,
        touch,
        http,
    }
}

fn rig() -> Rig {
    rig_with(ScriptedTouch::new(), StaticHttp::new(), DeviceConfig::default())
}

fn run(rig: &Rig, source: &str) {
    rig.host
        .execute_source("test", source)
        .unwrap_or_else(|diag| panic!("script failed: {diag}"));
}

fn values(rig: &Rig, expr: &str) -> Vec<String> {
    match rig.host.evaluate(expr) {
        Evaluation::Values(values) => values,
        other => panic!("{expr} did not evaluate: {other:?}"),
    }
}

fn raise_message(rig: &Rig, source: &str) -> String {
    rig.host
        .execute_source("test", source)
        .expect_err("script should raise")
        .message
}

#[test]
fn display_constants_and_size() {
    let _runtime = common::exclusive();
    let rig = rig();
    assert_eq!(values(&rig, "display.WIDTH, display.HEIGHT"), vec!["800", "480"]);
    assert_eq!(values(&rig, "display.size()"), vec!["800", "480"]);
    assert_eq!(values(&rig, "display.RED"), vec![display::RED.to_string()]);
    assert_eq!(values(&rig, "display.FONT_GARAMOND_20"), vec!["2"]);
}

#[test]
fn display_coerces_arguments() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, "display.pixel(3, 4, 0x1F800)");
    assert_eq!(rig.display.borrow().pixel(3, 4), display::RED);
    assert_eq!(values(&rig, "display.getpixel(3, 4)"), vec![display::RED.to_string()]);

    run(&rig, "display.backlight(250)");
    assert_eq!(rig.display.borrow().backlight, 100);
    run(&rig, "display.backlight(-3)");
    assert_eq!(rig.display.borrow().backlight, 0);

    assert_eq!(
        values(&rig, "display.rgb(300, -5, 255)"),
        vec![display::rgb565(255, 0, 255).to_string()]
    );
}

#[test]
fn display_fonts() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, "display.text_font(0, 0, 'hi', display.WHITE, 9)");
    assert_eq!(rig.display.borrow().texts[0].font, Font::Default);

    run(&rig, "display.setfont(display.FONT_INTER_20)");
    assert_eq!(values(&rig, "display.getfont()"), vec!["1"]);
    run(&rig, "display.text(10, 20, 'label', display.WHITE)");
    let texts = rig.display.borrow().texts.clone();
    assert_eq!(texts[1].font, Font::Inter20);
    assert_eq!(texts[1].text, "label");

    let message = raise_message(&rig, "display.setfont(7)");
    assert!(message.contains("Invalid font ID: 7 (valid: 0-2)"), "{message}");
}

#[test]
fn display_shapes_touch_expected_pixels() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, "display.rect(10, 10, 5, 5, display.GREEN, true)");
    run(&rig, "display.line(0, 0, 9, 0, display.BLUE)");
    run(&rig, "display.fill_circle(100, 100, 3, display.WHITE)");
    let fb = rig.display.borrow();
    assert_eq!(fb.pixel(12, 12), display::GREEN);
    assert_eq!(fb.pixel(9, 0), display::BLUE);
    assert_eq!(fb.pixel(100, 100), display::WHITE);
    assert_eq!(fb.pixel(200, 200), display::BLACK);
}

#[test]
fn display_image_checks_payload_length() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, r#"display.image(0, 0, 2, 1, "\x00\xF8\xE0\x07")"#);
    assert_eq!(rig.display.borrow().pixel(0, 0), display::RED);
    assert_eq!(rig.display.borrow().pixel(1, 0), display::GREEN);

    let message = raise_message(&rig, r#"display.image(0, 0, 2, 2, "\x00\xF8")"#);
    assert!(message.contains("Image data too short: expected 8 bytes, got 2"), "{message}");
}

#[test]
fn display_errors_raise_and_runtime_survives() {
    let _runtime = common::exclusive();
    let rig = rig();
    let diag = rig
        .host
        .execute_source("test", "display.pixel(1)")
        .expect_err("missing arguments");
    assert_eq!(diag.kind, DiagnosticKind::Runtime);
    run(&rig, "display.clear()");
}

#[test]
fn i2c_write_then_read_round_trip() {
    let _runtime = common::exclusive();
    let rig = rig();
    rig.bus.borrow_mut().attach(0, 0x3C);
    run(
        &rig,
        r#"
        assert(i2c.init(i2c.PORT0, 21, 22) == true)
        assert(i2c.write(0, 0x3C, {0x10, 1, 2, 0x1FF}) == true)
        local bytes = i2c.writeread(0, 0x3C, {0x10}, 3)
        assert(#bytes == 3 and bytes[1] == 1 and bytes[2] == 2 and bytes[3] == 255)
        "#,
    );
    let bus = rig.bus.borrow();
    let device = bus.device(0, 0x3C).expect("attached");
    assert_eq!(device.register(0x12), 0xFF);
    assert_eq!(bus.settings(0).map(|s| s.freq_hz), Some(100_000));
}

#[test]
fn i2c_accepts_string_payloads() {
    let _runtime = common::exclusive();
    let rig = rig();
    rig.bus.borrow_mut().attach(0, 0x50);
    run(
        &rig,
        r#"
        i2c.init(0, 21, 22, 400000)
        assert(i2c.write(0, 0x50, "\x05AB"))
        i2c.write(0, 0x50, {0x05})
        local bytes = i2c.read(0, 0x50, 2)
        assert(bytes[1] == 65 and bytes[2] == 66)
        "#,
    );
    let message = raise_message(&rig, "i2c.write(0, 0x50, 42)");
    assert!(message.contains("Expected table or string for data"), "{message}");
}

#[test]
fn i2c_transport_failures_return_nil_and_code() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, "i2c.init(1, 5, 6)");
    assert_eq!(values(&rig, "i2c.write(1, 0x20, {1})"), vec!["nil", "-1"]);
    assert_eq!(values(&rig, "i2c.read(1, 0x20, 4)"), vec!["nil", "-1"]);
}

#[test]
fn i2c_misuse_raises() {
    let _runtime = common::exclusive();
    let rig = rig();
    let message = raise_message(&rig, "i2c.read(1, 0x20, 1)");
    assert!(message.contains("I2C port 1 not initialized"), "{message}");

    let message = raise_message(&rig, "i2c.init(5, 1, 2)");
    assert!(message.contains("Invalid I2C port: 5"), "{message}");

    run(&rig, "i2c.init(0, 1, 2)");
    let message = raise_message(&rig, "i2c.read(0, 0x20, 0)");
    assert!(message.contains("Invalid read length"), "{message}");
    let message = raise_message(&rig, "i2c.read(0, 0x20, 257)");
    assert!(message.contains("Invalid read length"), "{message}");
    let message = raise_message(&rig, "i2c.write(0, 0x80, {1})");
    assert!(message.contains("Invalid I2C address"), "{message}");

    run(&rig, "i2c.deinit(0)");
    let message = raise_message(&rig, "i2c.scan(0)");
    assert!(message.contains("not initialized"), "{message}");
}

#[test]
fn i2c_scan_lists_responding_addresses() {
    let _runtime = common::exclusive();
    let rig = rig();
    {
        let mut bus = rig.bus.borrow_mut();
        bus.attach(0, 0x68);
        bus.attach(0, 0x3C);
        bus.attach(0, 0x05);
        bus.attach(1, 0x40);
    }
    run(
        &rig,
        r#"
        i2c.init(0, 1, 2)
        local found = i2c.scan(0)
        assert(#found == 2 and found[1] == 0x3C and found[2] == 0x68)
        "#,
    );
}

fn network_config() -> DeviceConfig {
    DeviceConfig {
        networks: vec![
            NetworkEntry {
                ssid: "office".to_string(),
                password: "hunter2".to_string(),
            },
            NetworkEntry {
                ssid: "lab".to_string(),
                password: "secret".to_string(),
            },
        ],
        ..DeviceConfig::default()
    }
}

#[test]
fn wifi_connects_to_known_networks() {
    let _runtime = common::exclusive();
    let rig = rig_with(ScriptedTouch::new(), StaticHttp::new(), network_config());
    assert_eq!(values(&rig, "wifi.is_connected(), wifi.get_ip()"), vec!["false", "nil"]);
    assert_eq!(values(&rig, "wifi.init()"), vec!["true"]);
    assert_eq!(values(&rig, "wifi.connect('lab', 'secret')"), vec!["true"]);
    assert_eq!(
        values(&rig, "wifi.is_connected(), wifi.get_ip(), wifi.get_rssi()"),
        vec!["true", "192.168.4.3", "-45"]
    );
    assert_eq!(values(&rig, "wifi.disconnect()"), vec!["true"]);
    assert_eq!(values(&rig, "wifi.get_rssi()"), vec!["nil"]);
}

#[test]
fn wifi_failures_return_nil_and_message() {
    let _runtime = common::exclusive();
    let rig = rig_with(ScriptedTouch::new(), StaticHttp::new(), network_config());
    let result = values(&rig, "wifi.connect('office', 'wrong')");
    assert_eq!(result[0], "nil");
    assert!(result[1].contains("failed to connect to office"));

    let result = values(&rig, "wifi.connect('nowhere', 'x', 250)");
    assert_eq!(result[0], "nil");
    assert!(result[1].contains("250 ms"), "{}", result[1]);
    assert_eq!(values(&rig, "wifi.is_connected()"), vec!["false"]);
}

#[test]
fn http_get_and_post() {
    let _runtime = common::exclusive();
    let http = StaticHttp::new()
        .route("http://dash.local/status", HttpResponse::new(200, "{\"ok\":true}"))
        .route("http://dash.local/missing", HttpResponse::new(404, "not here"));
    let rig = rig_with(ScriptedTouch::new(), http, DeviceConfig::default());

    assert_eq!(values(&rig, "http.get('http://dash.local/status')"), vec!["{\"ok\":true}"]);
    assert_eq!(
        values(&rig, "http.get('http://dash.local/missing')"),
        vec!["nil", "HTTP error: 404"]
    );
    let result = values(&rig, "http.get('http://elsewhere/')");
    assert_eq!(result[0], "nil");

    values(&rig, "http.post('http://dash.local/status', '{}')");
    values(&rig, "http.post('http://dash.local/status', 'a=1', 'text/plain', 500)");
    let requests = rig.http.requests();
    let posts: Vec<_> = requests.iter().filter(|r| r.method == Method::Post).collect();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(posts[0].body.as_deref(), Some("{}"));
    assert_eq!(posts[0].timeout.as_millis(), 10_000);
    assert_eq!(posts[1].content_type.as_deref(), Some("text/plain"));
    assert_eq!(posts[1].timeout.as_millis(), 500);
}

#[test]
fn http_bodies_are_capped() {
    let _runtime = common::exclusive();
    let http = StaticHttp::new().route("http://big/", HttpResponse::new(200, "x".repeat(100)));
    let config = DeviceConfig {
        http_max_response_bytes: 16,
        ..DeviceConfig::default()
    };
    let rig = rig_with(ScriptedTouch::new(), http, config);
    assert_eq!(values(&rig, "#http.get('http://big/')"), vec!["15"]);
}

#[test]
fn touch_reports_nothing_before_init() {
    let _runtime = common::exclusive();
    let rig = rig();
    assert_eq!(values(&rig, "touch.read()"), vec!["nil", "nil", "false"]);
    assert_eq!(values(&rig, "touch.is_touched()"), vec!["false"]);
    assert_eq!(values(&rig, "touch.WIDTH, touch.HEIGHT"), vec!["800", "480"]);
}

#[test]
fn touch_tracks_last_point() {
    let _runtime = common::exclusive();
    let mut panel = ScriptedTouch::new();
    panel.push(TouchSample::Pressed { x: 120, y: 45 });
    panel.push_error(NativeError::failed("bus error"));
    panel.push(TouchSample::Released);
    let rig = rig_with(panel, StaticHttp::new(), DeviceConfig::default());

    assert_eq!(values(&rig, "touch.init()"), vec!["true"]);
    assert_eq!(values(&rig, "touch.read()"), vec!["120", "45", "true"]);
    assert_eq!(values(&rig, "touch.is_touched()"), vec!["true"]);
    assert_eq!(values(&rig, "touch.read()"), vec!["120", "45", "false"]);
    assert_eq!(values(&rig, "touch.read()"), vec!["120", "45", "false"]);
    assert_eq!(values(&rig, "touch.is_touched()"), vec!["false"]);
    assert_eq!(values(&rig, "touch.get_point()"), vec!["120", "45"]);
    rig.touch.borrow_mut().push(TouchSample::Pressed { x: 7, y: 9 });
    assert_eq!(values(&rig, "touch.read()"), vec!["7", "9", "true"]);
}

#[test]
fn touch_init_fails_without_controller() {
    let _runtime = common::exclusive();
    let rig = rig_with(ScriptedTouch::absent(), StaticHttp::new(), DeviceConfig::default());
    assert_eq!(values(&rig, "touch.init()"), vec!["false"]);
    assert_eq!(values(&rig, "touch.read()"), vec!["nil", "nil", "false"]);
}

#[test]
fn sys_sleep_rejects_negative_durations() {
    let _runtime = common::exclusive();
    let rig = rig();
    run(&rig, "sys.sleep(0) sys.sleep(2)");
    let message = raise_message(&rig, "sys.sleep(-1)");
    assert!(message.contains("must not be negative"), "{message}");
}

#[test]
fn namespace_is_published_whole() {
    let _runtime = common::exclusive();
    let host = Host::initialize(&RuntimeConfig::default(), ConsoleOut::new(Capture::new()))
        .expect("runtime");
    let namespace = Namespace::new("probe", ErrorConvention::Sentinel)
        .constant("LEVEL", 3i64)
        .constant("NAME", "probe")
        .function("ok", |_, ()| Ok("fine"))
        .function("fail", |_, ()| -> Result<(), NativeError> {
            Err(NativeError::Transport {
                code: 263,
                message: "timeout".to_string(),
            })
        })
        .function("misuse", |_, ()| -> Result<(), NativeError> {
            Err(NativeError::invalid("bad argument"))
        });
    assert_eq!(
        namespace.function_names().collect::<Vec<_>>(),
        vec!["ok", "fail", "misuse"]
    );
    assert_eq!(namespace.convention(), ErrorConvention::Sentinel);
    host.register_namespace(namespace).expect("install");

    host.execute_source(
        "test",
        r#"
        assert(probe.LEVEL == 3 and probe.NAME == "probe")
        assert(probe.ok() == "fine")
        local value, code = probe.fail()
        assert(value == nil and code == 263)
        assert(not pcall(probe.misuse))
        "#,
    )
    .expect("namespace behaves");
}
