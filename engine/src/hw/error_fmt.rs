/// Success code reported by drivers for a plain `ASE_OK`.
pub const ASE_OK: i32 = 0;
/// Alternative success code returned by `future`-style driver calls.
pub const ASE_SUCCESS: i32 = 0x3f48_47a0;

/// Symbolic name of a native driver status code.
pub fn code_name(code: i32) -> &'static str {
    match code {
        ASE_OK => "ASE_OK",
        ASE_SUCCESS => "ASE_SUCCESS",
        -1000 => "ASE_NotPresent",
        -999 => "ASE_HWMalfunction",
        -998 => "ASE_InvalidParameter",
        -997 => "ASE_InvalidMode",
        -996 => "ASE_SPNotAdvancing",
        -995 => "ASE_NoClock",
        -994 => "ASE_NoMemory",
        _ => "unknown driver status",
    }
}

/// Format a native status code with its symbolic name and numeric value.
pub fn status(code: i32) -> String {
    format!("{} ({code})", code_name(code))
}
