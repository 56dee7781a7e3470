//! `<Alt-m>` toggles the tab's mute flag; `zi`/`zo`/`zr` zoom in, out and
//! back to default.

use keynav_cdp::{Command, Tab, wait_for_value};
use keynav_e2e::Session;
use serial_test::serial;
use tracing::warn;

/// Polls the active tab's zoom factor until `predicate` holds.
async fn wait_for_zoom<P>(s: &Session, tab: &Tab, predicate: P, description: &str) -> f64
where
    P: Fn(f64) -> bool,
{
    let ext = s.ext();
    let id = tab.id;
    let predicate = &predicate;
    wait_for_value(
        move || async move {
            let zoom = ext.get_zoom(id).await?;
            Ok(predicate(zoom).then_some(zoom))
        },
        s.wait(),
        description,
    )
    .await
    .expect(description)
}

async fn wait_for_muted(s: &Session, muted: bool) -> Tab {
    s.wait_for_active_tab(
        move |t| t.is_muted() == muted,
        if muted { "tab muted" } else { "tab unmuted" },
    )
    .await
    .expect("mute state")
}

#[tokio::test]
#[ignore] // Requires Chrome, the extension and an audio device
#[serial]
async fn alt_m_toggles_mute() {
    let Some(s) = Session::start("audio-test.html").await.expect("session") else {
        return;
    };

    let state: String = s.page().evaluate("window.__audioState").await.unwrap();
    if state != "running" {
        warn!(state, "skipping: page audio is not running");
        s.close().await.unwrap();
        return;
    }
    let tab = s.active_tab().await.unwrap();
    if tab.audible != Some(true) {
        warn!("skipping: tab is not audible in this browser");
        s.close().await.unwrap();
        return;
    }
    assert!(!tab.is_muted());

    s.press(Command::ToggleMute).await.unwrap();
    wait_for_muted(&s, true).await;

    s.press(Command::ToggleMute).await.unwrap();
    wait_for_muted(&s, false).await;

    s.close().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn zi_zo_and_zr_change_zoom() {
    let Some(s) = Session::start("index.html").await.expect("session") else {
        return;
    };
    let tab = s.active_tab().await.unwrap();
    let initial = s.ext().get_zoom(tab.id).await.unwrap();
    assert!((initial - 1.0).abs() < f64::EPSILON, "starts at 100%: {initial}");

    s.press(Command::ZoomIn).await.unwrap();
    let zoomed_in = wait_for_zoom(&s, &tab, |z| z > initial, "zoom in").await;

    s.press(Command::ZoomOut).await.unwrap();
    wait_for_zoom(&s, &tab, |z| z < zoomed_in, "zoom out").await;

    s.press(Command::ZoomOut).await.unwrap();
    wait_for_zoom(&s, &tab, |z| z < initial, "zoom below default").await;

    s.press(Command::ZoomReset).await.unwrap();
    wait_for_zoom(&s, &tab, |z| (z - 1.0).abs() < 1e-6, "zoom reset").await;

    s.close().await.unwrap();
}
