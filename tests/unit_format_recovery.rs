use anyhow::Result;
use assert_matches::assert_matches;
use serde_json::json;
use workbook_guard::address::CellRange;
use workbook_guard::errors::{RestoreIntegrityError, TransientHostError};
use workbook_guard::host::HostCommand;
use workbook_guard::recovery::values::{BorderStyle, BorderWeight};
use workbook_guard::recovery::{BorderState, FormatState};
use workbook_guard::{CaptureRequest, CaptureSelection, RecoveryEngine, RecoverySnapshot};

mod support;

fn format_request(address: &str, selection: CaptureSelection) -> CaptureRequest {
    CaptureRequest::Format {
        address: address.to_string(),
        selection,
    }
}

fn format_state(snapshot: RecoverySnapshot) -> FormatState {
    match snapshot {
        RecoverySnapshot::Format { state, .. } => state,
        other => panic!("expected a format snapshot, got {}", other.feature()),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn fill_and_top_border_restore_end_to_end() -> Result<()> {
    let host = support::workbook();
    host.update_cells("Sheet1", "A1:B2", |cell| {
        cell.fill = Some("#FFFF00".to_string());
    })?;
    host.update_cells("Sheet1", "A1:B1", |cell| {
        cell.top = support::border("Continuous", Some("Thin"));
    })?;
    let engine = RecoveryEngine::new(20_000);
    let selection = CaptureSelection {
        fill_color: true,
        border_top: true,
        ..Default::default()
    };

    let original = engine
        .capture(host.as_ref(), &format_request("Sheet1!A1:B2", selection))
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;

    let mut target = format_state(original.clone());
    target.areas[0].fill_color = Some(Some("#00FF00".to_string()));
    target.areas[0].border_top = Some(BorderState::none());
    let previous = engine
        .restore(
            host.as_ref(),
            &RecoverySnapshot::Format {
                address: "Sheet1!A1:B2".to_string(),
                state: target,
            },
        )
        .await?;

    let area = &format_state(previous.clone()).areas[0];
    assert_eq!(area.fill_color, Some(Some("#FFFF00".to_string())));
    assert_eq!(
        area.border_top,
        Some(BorderState {
            style: BorderStyle::Continuous,
            weight: Some(BorderWeight::Thin),
            color: None,
        })
    );
    let as_json = serde_json::to_value(area)?;
    assert_eq!(as_json["fill_color"], json!("#FFFF00"));
    assert_eq!(
        as_json["border_top"],
        json!({"style": "Continuous", "weight": "Thin"})
    );

    let changed = host.cell_format("Sheet1", "B2")?;
    assert_eq!(changed.fill.as_deref(), Some("#00FF00"));
    assert_eq!(host.cell_format("Sheet1", "A1")?.top.style, "None");

    engine.restore(host.as_ref(), &previous).await?;
    assert_eq!(host.cell_format("Sheet1", "B2")?.fill.as_deref(), Some("#FFFF00"));
    assert_eq!(
        host.cell_format("Sheet1", "B1")?.top,
        support::border("Continuous", Some("Thin"))
    );

    let recaptured = engine
        .capture(host.as_ref(), &format_request("Sheet1!A1:B2", selection))
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    assert_eq!(recaptured, original);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn full_selection_round_trips() -> Result<()> {
    let host = support::workbook();
    host.update_cells("Sheet1", "A1:C3", |cell| {
        cell.bold = true;
        cell.font_name = "Arial".to_string();
        cell.horizontal = "Center".to_string();
        cell.wrap_text = true;
    })?;
    host.update_cells("Sheet1", "A1", |cell| cell.number_format = "0.00%".to_string())?;
    host.set_column_width("Sheet1", 2, 72.0)?;
    host.set_row_height("Sheet1", 3, 30.0)?;
    host.add_merge("Sheet1", "B2:C3")?;
    let engine = RecoveryEngine::new(0);
    let request = format_request("Sheet1!A1:C3", CaptureSelection::all());

    let first = engine
        .capture(host.as_ref(), &request)
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    let area = &format_state(first.clone()).areas[0];
    assert_eq!(area.number_format.as_ref().map(|m| m[0][0].as_str()), Some("0.00%"));
    assert_eq!(area.column_widths, Some(vec![48.0, 72.0, 48.0]));
    assert_eq!(area.row_heights, Some(vec![15.0, 15.0, 30.0]));
    assert_eq!(area.merged_areas, Some(vec!["B2:C3".to_string()]));

    host.clear_command_log();
    engine.restore(host.as_ref(), &first).await?;
    let merge_commands = host
        .command_log()
        .into_iter()
        .filter(|c| matches!(c, HostCommand::Merge { .. } | HostCommand::Unmerge { .. }))
        .count();
    assert_eq!(merge_commands, 0);

    let second = engine
        .capture(host.as_ref(), &request)
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    assert_eq!(second, first);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn merges_restore_as_set_difference() -> Result<()> {
    let host = support::workbook();
    host.add_merge("Sheet1", "A1:B2")?;
    let engine = RecoveryEngine::new(0);
    let selection = CaptureSelection {
        merged_areas: true,
        ..Default::default()
    };
    let captured = engine
        .capture(host.as_ref(), &format_request("Sheet1!A1:D2", selection))
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;

    let mut target = format_state(captured);
    target.areas[0].merged_areas = Some(vec!["C1:D2".to_string()]);
    host.clear_command_log();
    engine
        .restore(
            host.as_ref(),
            &RecoverySnapshot::Format {
                address: "Sheet1!A1:D2".to_string(),
                state: target,
            },
        )
        .await?;

    let merges: Vec<HostCommand> = host
        .command_log()
        .into_iter()
        .filter(|c| matches!(c, HostCommand::Merge { .. } | HostCommand::Unmerge { .. }))
        .collect();
    assert_eq!(
        merges,
        vec![
            HostCommand::Unmerge {
                sheet: "Sheet1".to_string(),
                range: CellRange::parse("A1:B2")?,
            },
            HostCommand::Merge {
                sheet: "Sheet1".to_string(),
                range: CellRange::parse("C1:D2")?,
            },
        ]
    );
    assert_eq!(host.merges("Sheet1")?, vec!["C1:D2".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn capture_cost_over_the_ceiling_is_unsupported() -> Result<()> {
    let host = support::workbook();
    let engine = RecoveryEngine::new(40);
    let selection = CaptureSelection {
        number_format: true,
        ..Default::default()
    };

    let result = engine
        .capture(host.as_ref(), &format_request("Sheet1!A1:E10", selection))
        .await?;
    assert!(!result.supported);
    assert_eq!(
        result.reason.as_deref(),
        Some("estimated capture cost 50 exceeds the limit of 40")
    );
    assert_eq!(host.sync_count(), 0);

    let cheap = CaptureSelection {
        column_width: true,
        ..Default::default()
    };
    let result = engine
        .capture(host.as_ref(), &format_request("Sheet1!A1:E10", cheap))
        .await?;
    assert!(result.supported);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn mixed_and_unknown_values_fail_closed() -> Result<()> {
    let host = support::workbook();
    host.update_cells("Sheet1", "A1", |cell| cell.bold = true)?;
    host.update_cells("Data", "A1:B1", |cell| {
        cell.top = support::border("Wavy", Some("Thin"));
    })?;
    let engine = RecoveryEngine::new(0);

    let mixed = engine
        .capture(
            host.as_ref(),
            &format_request(
                "Sheet1!A1:B2",
                CaptureSelection {
                    bold: true,
                    fill_color: true,
                    ..Default::default()
                },
            ),
        )
        .await?;
    assert!(!mixed.supported);
    assert_eq!(mixed.state, None);
    assert_eq!(
        mixed.reason.as_deref(),
        Some("bold is not uniform across Sheet1!A1:B2")
    );

    let unknown = engine
        .capture(
            host.as_ref(),
            &format_request(
                "Data!A1:B2",
                CaptureSelection {
                    border_top: true,
                    ..Default::default()
                },
            ),
        )
        .await?;
    assert!(!unknown.supported);
    assert_matches!(unknown.reason, Some(reason) if reason.contains("unrecognized border style 'Wavy'"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn multi_sheet_capture_is_refused() -> Result<()> {
    let host = support::workbook();
    let engine = RecoveryEngine::new(0);
    let result = engine
        .capture(
            host.as_ref(),
            &format_request(
                "Sheet1!A1:B2,Data!A1",
                CaptureSelection {
                    fill_color: true,
                    ..Default::default()
                },
            ),
        )
        .await?;
    assert!(!result.supported);
    assert_matches!(result.reason, Some(reason) if reason.contains("multiple worksheets"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn multi_area_capture_on_one_sheet_keeps_area_order() -> Result<()> {
    let host = support::workbook();
    host.update_cells("Sheet1", "D4", |cell| cell.fill = Some("#112233".to_string()))?;
    let engine = RecoveryEngine::new(0);
    let state = format_state(
        engine
            .capture(
                host.as_ref(),
                &format_request(
                    "Sheet1!A1:B2, Sheet1!D4",
                    CaptureSelection {
                        fill_color: true,
                        ..Default::default()
                    },
                ),
            )
            .await?
            .into_result()
            .map_err(anyhow::Error::msg)?,
    );
    assert_eq!(state.areas.len(), 2);
    assert_eq!(state.areas[0].fill_color, Some(None));
    assert_eq!(state.areas[1].fill_color, Some(Some("#112233".to_string())));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn restore_rejects_changed_shape_and_missing_sheet() -> Result<()> {
    let host = support::workbook();
    let engine = RecoveryEngine::new(0);
    let selection = CaptureSelection {
        fill_color: true,
        ..Default::default()
    };
    let captured = format_state(
        engine
            .capture(host.as_ref(), &format_request("Data!A1:B2", selection))
            .await?
            .into_result()
            .map_err(anyhow::Error::msg)?,
    );

    let wrong_shape = RecoverySnapshot::Format {
        address: "Data!A1:C3".to_string(),
        state: captured.clone(),
    };
    let err = engine.restore(host.as_ref(), &wrong_shape).await.unwrap_err();
    assert!(err.is::<RestoreIntegrityError>(), "{err}");

    host.remove_sheet("Data")?;
    host.clear_command_log();
    let missing = RecoverySnapshot::Format {
        address: "Data!A1:B2".to_string(),
        state: captured,
    };
    let err = engine.restore(host.as_ref(), &missing).await.unwrap_err();
    assert!(err.is::<RestoreIntegrityError>(), "{err}");
    assert!(host.command_log().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn host_failures_surface_as_transient_errors() -> Result<()> {
    let host = support::workbook();
    host.fail_next_sync("GeneralException", "the host is busy");
    let engine = RecoveryEngine::new(0);
    let err = engine
        .capture(
            host.as_ref(),
            &format_request(
                "Sheet1!A1",
                CaptureSelection {
                    bold: true,
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap_err();
    let transient = err
        .downcast_ref::<TransientHostError>()
        .ok_or_else(|| anyhow::anyhow!("expected a host error, got {err}"))?;
    assert_eq!(transient.code(), "GeneralException");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn restore_targets_the_captured_sheet_after_active_sheet_changes() -> Result<()> {
    let host = support::workbook();
    host.update_cells("Sheet1", "A1", |cell| cell.fill = Some("#FFFF00".to_string()))?;
    host.update_cells("Data", "A1", |cell| cell.fill = Some("#0000FF".to_string()))?;
    let engine = RecoveryEngine::new(0);
    let selection = CaptureSelection {
        fill_color: true,
        ..Default::default()
    };

    let original = engine
        .capture(host.as_ref(), &format_request("A1", selection))
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    assert_eq!(original.address(), Some("Sheet1!A1"));

    host.update_cells("Sheet1", "A1", |cell| cell.fill = Some("#00FF00".to_string()))?;
    host.set_active_sheet("Data")?;
    let redo = engine.restore(host.as_ref(), &original).await?;

    assert_eq!(host.cell_format("Sheet1", "A1")?.fill.as_deref(), Some("#FFFF00"));
    assert_eq!(host.cell_format("Data", "A1")?.fill.as_deref(), Some("#0000FF"));
    assert_eq!(redo.address(), Some("Sheet1!A1"));
    assert_eq!(
        format_state(redo).areas[0].fill_color,
        Some(Some("#00FF00".to_string()))
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn active_sheet_captures_pin_every_area() -> Result<()> {
    let host = support::workbook();
    host.set_active_sheet("Data")?;
    host.update_cells("Data", "D4", |cell| cell.fill = Some("#112233".to_string()))?;
    let engine = RecoveryEngine::new(0);

    let snapshot = engine
        .capture(
            host.as_ref(),
            &format_request(
                "A1:B2, d4",
                CaptureSelection {
                    fill_color: true,
                    ..Default::default()
                },
            ),
        )
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    assert_eq!(snapshot.address(), Some("Data!A1:B2,Data!D4"));
    assert_eq!(
        format_state(snapshot).areas[1].fill_color,
        Some(Some("#112233".to_string()))
    );

    // a pinned snapshot fails closed once its sheet is gone
    let pinned = engine
        .capture(host.as_ref(), &format_request("A1", CaptureSelection::all()))
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    host.set_active_sheet("Sheet1")?;
    host.remove_sheet("Data")?;
    let err = engine.restore(host.as_ref(), &pinned).await.unwrap_err();
    assert!(err.is::<RestoreIntegrityError>(), "{err}");
    assert_eq!(host.cell_format("Sheet1", "A1")?.fill, None);
    Ok(())
}
