//! Window commands: `W` moves the current tab into a new window.

use keynav_cdp::{Command, wait_for_value};
use keynav_e2e::Session;
use serial_test::serial;

#[tokio::test]
#[ignore] // Requires Chrome and the extension
#[serial]
async fn w_moves_tab_to_new_window() {
    let Some(s) = Session::start("tabs-test.html?tab=0").await.expect("session") else {
        return;
    };
    s.open_tab("tabs-test.html?tab=1").await.unwrap();
    s.wait_for_tab_count(2).await.unwrap();

    let tab = s.active_tab().await.unwrap();
    let before = s.ext().all_windows().await.unwrap();
    assert_eq!(before.len(), 1);

    s.press(Command::MoveTabToNewWindow).await.unwrap();

    let ext = s.ext();
    let windows = wait_for_value(
        move || async move {
            let windows = ext.all_windows().await?;
            Ok((windows.len() == 2).then_some(windows))
        },
        s.wait(),
        "a second window",
    )
    .await
    .expect("new window");

    let moved = s.ext().get_tab(tab.id).await.unwrap();
    assert_ne!(moved.window_id, before[0].id, "tab left its window");
    let new_window = windows
        .iter()
        .find(|w| w.id == moved.window_id)
        .expect("tab's window is listed");
    assert_eq!(
        new_window.tabs.as_ref().map(Vec::len),
        Some(1),
        "new window holds only the moved tab"
    );

    // Session start resets windows too; verify the next run would start clean.
    let reset = s.ext().reset_tabs(&s.url("index.html")).await.unwrap();
    assert_eq!(s.ext().all_windows().await.unwrap().len(), 1);
    assert!(reset.active);

    s.close().await.unwrap();
}
