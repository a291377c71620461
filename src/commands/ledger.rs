//! 传输记录命令

use crate::core::TransferLedger;
use crate::models::LedgerDirection;
use crate::AppState;
use anyhow::Result;

/// 列出已记录的文件名
pub fn show_ledger(state: &AppState, direction: LedgerDirection) -> Vec<String> {
    TransferLedger::load(&state.ledger_path)
        .names(direction)
        .map(str::to_string)
        .collect()
}

/// 清空一个方向的记录，之后这些文件会重新传输
pub fn clear_ledger(state: &AppState, direction: LedgerDirection) -> Result<usize> {
    let mut ledger = TransferLedger::load(&state.ledger_path);
    Ok(ledger.clear(direction)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::with_dir(dir.path());
        let mut ledger = TransferLedger::load(&state.ledger_path);
        ledger.record(LedgerDirection::ToLocal, "b.csv").unwrap();
        ledger.record(LedgerDirection::ToLocal, "a.csv").unwrap();

        assert_eq!(show_ledger(&state, LedgerDirection::ToLocal), vec!["a.csv", "b.csv"]);
        assert!(show_ledger(&state, LedgerDirection::ToRemote).is_empty());

        assert_eq!(clear_ledger(&state, LedgerDirection::ToLocal).unwrap(), 2);
        assert!(show_ledger(&state, LedgerDirection::ToLocal).is_empty());
    }
}
