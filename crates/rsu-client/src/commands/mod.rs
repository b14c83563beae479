//! Command implementations for rsu-client

pub mod slot;
pub mod status;
pub mod table;

use anyhow::Result;
use rsu_core::Session;

use crate::Commands;

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_u64(text: &str) -> Result<u64, String> {
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("'{text}' is not a decimal or 0x hex number: {e}"))
}

/// Parse a slot number
pub fn parse_slot(text: &str) -> Result<usize, String> {
    let value = parse_u64(text)?;
    usize::try_from(value).map_err(|e| format!("slot {value} out of range: {e}"))
}

/// Run one command against an open session
pub fn execute(session: &mut Session, command: &Commands, json: bool) -> Result<()> {
    match command {
        Commands::Count => slot::count(session, json),
        Commands::List { slot } => slot::list(session, *slot, json),
        Commands::Size { slot } => slot::size(session, *slot, json),
        Commands::Priority { slot } => slot::priority(session, *slot, json),
        Commands::Enable { slot } => slot::enable(session, *slot, json),
        Commands::Disable { slot } => slot::disable(session, *slot, json),
        Commands::Erase { slot } => slot::erase(session, *slot, json),
        Commands::Add {
            file,
            slot,
            raw,
            factory_update,
        } => slot::add(session, *slot, file, slot::AddMode::new(*raw, *factory_update), json),
        Commands::Verify { file, slot, raw } => slot::verify(session, *slot, file, *raw, json),
        Commands::Copy { file, slot } => slot::copy(session, *slot, file, json),
        Commands::CreateSlot {
            name,
            address,
            length,
        } => slot::create(session, name, *address, *length, json),
        Commands::DeleteSlot { slot } => slot::delete(session, *slot, json),
        Commands::RenameSlot { slot, name } => slot::rename(session, *slot, name, json),

        Commands::Status => status::log(session, json),
        Commands::Request { slot } => status::request(session, *slot, json),
        Commands::RequestFactory => status::request_factory(session, json),
        Commands::Notify { value } => status::notify(session, *value, json),
        Commands::ClearErrorStatus => status::clear_error_status(session, json),
        Commands::ResetRetryCounter => status::reset_retry_counter(session, json),
        Commands::DcmfVersion => status::dcmf_version(session, json),
        Commands::DcmfStatus => status::dcmf_status(session, json),
        Commands::MaxRetry => status::max_retry(session, json),
        Commands::CheckRunningFactory => status::running_factory(session, json),

        Commands::SaveSpt { file } => table::save_spt(session, file, json),
        Commands::RestoreSpt { file } => table::restore_spt(session, file, json),
        Commands::CreateEmptyCpb => table::empty_cpb(session, json),
        Commands::SaveCpb { file } => table::save_cpb(session, file, json),
        Commands::RestoreCpb { file } => table::restore_cpb(session, file, json),

        Commands::Config => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_accepts_both_radixes() {
        assert_eq!(parse_u64("4096"), Ok(4096));
        assert_eq!(parse_u64("0x1000"), Ok(4096));
        assert_eq!(parse_u64("0XFF"), Ok(255));
        assert!(matches!(parse_u64("0x"), Err(_)));
        assert!(matches!(parse_u64("-1"), Err(_)));
        assert!(matches!(parse_u64("12k"), Err(_)));
    }

    #[test]
    fn test_parse_slot() {
        assert_eq!(parse_slot("0x2"), Ok(2));
        assert!(matches!(parse_slot("slot"), Err(_)));
    }
}
