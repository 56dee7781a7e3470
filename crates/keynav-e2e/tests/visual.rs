//! Visual mode: `v` enters, `l`/`w` extend the selection, `y` yanks it,
//! `Esc` leaves.

use keynav_cdp::{Command, wait_for_value};
use keynav_e2e::{Session, dom};
use serial_test::serial;

const TEXT: &str = "The quick brown fox jumps over the lazy dog";

/// Enters range visual mode from a caret at the start of `#text`.
///
/// The first `v` may land in caret mode; a second one switches to range.
async fn enter_range_mode(s: &Session) {
    dom::place_caret(s.page(), "#text", 0).await.unwrap();
    s.press(Command::VisualMode).await.unwrap();

    let page = s.page();
    let kind = wait_for_value(
        move || async move {
            let kind = dom::selection_type(page).await?;
            Ok((kind == "Caret" || kind == "Range").then_some(kind))
        },
        s.wait(),
        "visual mode",
    )
    .await
    .expect("visual mode entered");

    if kind == "Caret" {
        s.press(Command::VisualMode).await.unwrap();
        s.wait_until("window.getSelection().type === 'Range'", "range mode")
            .await
            .expect("range mode");
    }
}

/// Waits for the selection to grow past `len` characters.
async fn wait_for_longer_selection(s: &Session, len: usize) -> String {
    let page = s.page();
    wait_for_value(
        move || async move {
            let text = page.selection_text().await?;
            Ok((text.len() > len).then_some(text))
        },
        s.wait(),
        &format!("selection longer than {len}"),
    )
    .await
    .expect("selection extended")
}

#[tokio::test]
#[ignore] // Requires Chrome and the extension
#[serial]
async fn l_and_w_extend_the_selection() {
    let Some(s) = Session::start("visual-test.html").await.expect("session") else {
        return;
    };
    let coverage = s.start_coverage().await.unwrap();
    enter_range_mode(&s).await;

    let mut selected = s.page().selection_text().await.unwrap();
    for _ in 0..3 {
        s.press(Command::VisualForwardChar).await.unwrap();
        selected = wait_for_longer_selection(&s, selected.len()).await;
    }
    assert!(TEXT.starts_with(&selected), "selected {selected:?}");
    assert!(selected.starts_with("Th"), "selected {selected:?}");

    s.press(Command::VisualForwardWord).await.unwrap();
    let word = wait_for_longer_selection(&s, selected.len()).await;
    assert!(TEXT.starts_with(word.trim_end()), "selected {word:?}");
    assert!(word.len() >= "The q".len(), "w moves past the first word: {word:?}");

    s.save_coverage("visual_extend", coverage).await.unwrap();
    s.close().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn y_yanks_the_selection() {
    let Some(s) = Session::start("visual-test.html").await.expect("session") else {
        return;
    };
    enter_range_mode(&s).await;

    s.press(Command::VisualForwardWord).await.unwrap();
    let selected = wait_for_longer_selection(&s, 0).await;

    s.press(Command::VisualYank).await.unwrap();
    s.settle().await;

    let pasted = s.page().paste_clipboard().await.unwrap();
    assert_eq!(pasted, selected);
    s.close().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn escape_leaves_visual_mode() {
    let Some(s) = Session::start("visual-test.html").await.expect("session") else {
        return;
    };
    enter_range_mode(&s).await;
    s.press(Command::VisualForwardWord).await.unwrap();
    wait_for_longer_selection(&s, 0).await;

    s.press(Command::Escape).await.unwrap();
    s.wait_until(
        "window.getSelection().type !== 'Range'",
        "selection collapsed",
    )
    .await
    .expect("visual mode left");

    assert_eq!(s.page().selection_text().await.unwrap(), "");
    s.close().await.unwrap();
}
