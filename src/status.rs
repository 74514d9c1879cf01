//! Platform status codes and their diagnostic categories.
//!
//! Every backend reports failures as a raw numeric status in the OpenCL
//! code space. This module owns the closed lookup from those codes to a
//! symbolic name and a human-readable category. It is a pure table: no
//! retry, no recovery.

use std::fmt;

/// Coarse classification of a platform status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// Device missing, unavailable or invalid.
    Device,
    /// Context creation or validity.
    Context,
    /// Program compilation or program object state.
    Program,
    /// Kernel lookup or kernel object state.
    Kernel,
    /// Invalid arguments passed to the platform.
    Argument,
    /// ND-range shape: dimensions, offsets, work-group sizes.
    WorkSize,
    /// Allocation and memory object faults.
    Memory,
    /// Command queue and event faults.
    Queue,
    /// Platform discovery.
    Platform,
    /// A code outside the known table.
    Unknown,
}

impl StatusCategory {
    /// Short human-readable label used in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            StatusCategory::Device => "device fault",
            StatusCategory::Context => "context fault",
            StatusCategory::Program => "program fault",
            StatusCategory::Kernel => "kernel fault",
            StatusCategory::Argument => "argument fault",
            StatusCategory::WorkSize => "work-size fault",
            StatusCategory::Memory => "memory fault",
            StatusCategory::Queue => "queue fault",
            StatusCategory::Platform => "platform fault",
            StatusCategory::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

use StatusCategory::*;

const STATUS_TABLE: &[(i32, &str, StatusCategory)] = &[
    (-1, "CL_DEVICE_NOT_FOUND", Device),
    (-2, "CL_DEVICE_NOT_AVAILABLE", Device),
    (-3, "CL_COMPILER_NOT_AVAILABLE", Program),
    (-4, "CL_MEM_OBJECT_ALLOCATION_FAILURE", Memory),
    (-5, "CL_OUT_OF_RESOURCES", Memory),
    (-6, "CL_OUT_OF_HOST_MEMORY", Memory),
    (-7, "CL_PROFILING_INFO_NOT_AVAILABLE", Queue),
    (-8, "CL_MEM_COPY_OVERLAP", Memory),
    (-9, "CL_IMAGE_FORMAT_MISMATCH", Memory),
    (-10, "CL_IMAGE_FORMAT_NOT_SUPPORTED", Memory),
    (-11, "CL_BUILD_PROGRAM_FAILURE", Program),
    (-12, "CL_MAP_FAILURE", Memory),
    (-13, "CL_MISALIGNED_SUB_BUFFER_OFFSET", Memory),
    (-14, "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST", Queue),
    (-15, "CL_COMPILE_PROGRAM_FAILURE", Program),
    (-16, "CL_LINKER_NOT_AVAILABLE", Program),
    (-17, "CL_LINK_PROGRAM_FAILURE", Program),
    (-18, "CL_DEVICE_PARTITION_FAILED", Device),
    (-19, "CL_KERNEL_ARG_INFO_NOT_AVAILABLE", Kernel),
    (-30, "CL_INVALID_VALUE", Argument),
    (-31, "CL_INVALID_DEVICE_TYPE", Device),
    (-32, "CL_INVALID_PLATFORM", Platform),
    (-33, "CL_INVALID_DEVICE", Device),
    (-34, "CL_INVALID_CONTEXT", Context),
    (-35, "CL_INVALID_QUEUE_PROPERTIES", Queue),
    (-36, "CL_INVALID_COMMAND_QUEUE", Queue),
    (-37, "CL_INVALID_HOST_PTR", Memory),
    (-38, "CL_INVALID_MEM_OBJECT", Memory),
    (-39, "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR", Memory),
    (-40, "CL_INVALID_IMAGE_SIZE", Memory),
    (-41, "CL_INVALID_SAMPLER", Argument),
    (-42, "CL_INVALID_BINARY", Program),
    (-43, "CL_INVALID_BUILD_OPTIONS", Program),
    (-44, "CL_INVALID_PROGRAM", Program),
    (-45, "CL_INVALID_PROGRAM_EXECUTABLE", Program),
    (-46, "CL_INVALID_KERNEL_NAME", Kernel),
    (-47, "CL_INVALID_KERNEL_DEFINITION", Kernel),
    (-48, "CL_INVALID_KERNEL", Kernel),
    (-49, "CL_INVALID_ARG_INDEX", Argument),
    (-50, "CL_INVALID_ARG_VALUE", Argument),
    (-51, "CL_INVALID_ARG_SIZE", Argument),
    (-52, "CL_INVALID_KERNEL_ARGS", Argument),
    (-53, "CL_INVALID_WORK_DIMENSION", WorkSize),
    (-54, "CL_INVALID_WORK_GROUP_SIZE", WorkSize),
    (-55, "CL_INVALID_WORK_ITEM_SIZE", WorkSize),
    (-56, "CL_INVALID_GLOBAL_OFFSET", WorkSize),
    (-57, "CL_INVALID_EVENT_WAIT_LIST", Queue),
    (-58, "CL_INVALID_EVENT", Queue),
    (-59, "CL_INVALID_OPERATION", Queue),
    (-60, "CL_INVALID_GL_OBJECT", Memory),
    (-61, "CL_INVALID_BUFFER_SIZE", Memory),
    (-62, "CL_INVALID_MIP_LEVEL", Memory),
    (-63, "CL_INVALID_GLOBAL_WORK_SIZE", WorkSize),
    (-64, "CL_INVALID_PROPERTY", Context),
    (-65, "CL_INVALID_IMAGE_DESCRIPTOR", Memory),
    (-66, "CL_INVALID_COMPILER_OPTIONS", Program),
    (-67, "CL_INVALID_LINKER_OPTIONS", Program),
    (-68, "CL_INVALID_DEVICE_PARTITION_COUNT", Device),
    (-1001, "CL_PLATFORM_NOT_FOUND_KHR", Platform),
];

/// A raw platform status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    /// `CL_SUCCESS`.
    pub const SUCCESS: Status = Status(0);
    /// `CL_DEVICE_NOT_FOUND` (-1).
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    /// `CL_DEVICE_NOT_AVAILABLE` (-2).
    pub const DEVICE_NOT_AVAILABLE: Status = Status(-2);
    /// `CL_OUT_OF_RESOURCES` (-5).
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    /// `CL_OUT_OF_HOST_MEMORY` (-6).
    pub const OUT_OF_HOST_MEMORY: Status = Status(-6);
    /// `CL_BUILD_PROGRAM_FAILURE` (-11).
    pub const BUILD_PROGRAM_FAILURE: Status = Status(-11);
    /// `CL_INVALID_VALUE` (-30).
    pub const INVALID_VALUE: Status = Status(-30);
    /// `CL_INVALID_DEVICE` (-33).
    pub const INVALID_DEVICE: Status = Status(-33);
    /// `CL_INVALID_CONTEXT` (-34).
    pub const INVALID_CONTEXT: Status = Status(-34);
    /// `CL_INVALID_COMMAND_QUEUE` (-36).
    pub const INVALID_COMMAND_QUEUE: Status = Status(-36);
    /// `CL_INVALID_MEM_OBJECT` (-38).
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    /// `CL_INVALID_BUILD_OPTIONS` (-43).
    pub const INVALID_BUILD_OPTIONS: Status = Status(-43);
    /// `CL_INVALID_KERNEL_NAME` (-46).
    pub const INVALID_KERNEL_NAME: Status = Status(-46);
    /// `CL_INVALID_ARG_INDEX` (-49).
    pub const INVALID_ARG_INDEX: Status = Status(-49);
    /// `CL_INVALID_KERNEL_ARGS` (-52).
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    /// `CL_INVALID_GLOBAL_WORK_SIZE` (-63).
    pub const INVALID_GLOBAL_WORK_SIZE: Status = Status(-63);
    /// `CL_INVALID_BUFFER_SIZE` (-61).
    pub const INVALID_BUFFER_SIZE: Status = Status(-61);

    /// Wrap a raw code.
    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    /// The raw code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Whether the code is `CL_SUCCESS`.
    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    fn lookup(self) -> Option<(&'static str, StatusCategory)> {
        STATUS_TABLE
            .iter()
            .find(|(code, _, _)| *code == self.0)
            .map(|&(_, name, category)| (name, category))
    }

    /// Whether the code is part of the known table.
    pub fn is_mapped(self) -> bool {
        self.is_success() || self.lookup().is_some()
    }

    /// Symbolic name, e.g. `CL_INVALID_KERNEL_NAME`.
    pub fn name(self) -> &'static str {
        if self.is_success() {
            return "CL_SUCCESS";
        }
        self.lookup().map(|(name, _)| name).unwrap_or("UNKNOWN_STATUS")
    }

    /// Category of a known code. Unmapped codes are `Unknown`.
    pub fn category(self) -> StatusCategory {
        self.lookup()
            .map(|(_, category)| category)
            .unwrap_or(StatusCategory::Unknown)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({}, {})", self.0, self.name())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.0, self.category())
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

/// Fail with the status itself if `code` is not the success sentinel.
pub fn check(code: i32) -> std::result::Result<(), Status> {
    let status = Status(code);
    if status.is_success() {
        Ok(())
    } else {
        Err(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes() {
        assert!(check(0).is_ok());
        assert!(Status::SUCCESS.is_mapped());
        assert_eq!(Status::SUCCESS.name(), "CL_SUCCESS");
    }

    #[test]
    fn test_known_codes_map_to_categories() {
        assert_eq!(Status::from_code(-1).category(), StatusCategory::Device);
        assert_eq!(Status::from_code(-34).category(), StatusCategory::Context);
        assert_eq!(Status::from_code(-11).category(), StatusCategory::Program);
        assert_eq!(Status::from_code(-46).category(), StatusCategory::Kernel);
        assert_eq!(Status::from_code(-52).category(), StatusCategory::Argument);
        assert_eq!(Status::from_code(-63).category(), StatusCategory::WorkSize);
        assert_eq!(Status::from_code(-4).category(), StatusCategory::Memory);
        assert_eq!(Status::from_code(-36).category(), StatusCategory::Queue);
        assert_eq!(Status::INVALID_KERNEL_NAME.name(), "CL_INVALID_KERNEL_NAME");
    }

    #[test]
    fn test_unknown_code_still_fails() {
        let err = check(-9999).unwrap_err();
        assert!(!err.is_mapped());
        assert_eq!(err.category(), StatusCategory::Unknown);
        assert_eq!(err.name(), "UNKNOWN_STATUS");
        assert!(err.to_string().contains("unknown error"));

        // positive codes are not success either
        assert!(check(7).is_err());
    }

    #[test]
    fn test_table_has_no_duplicate_codes() {
        for (i, (code, _, _)) in STATUS_TABLE.iter().enumerate() {
            assert!(
                STATUS_TABLE[i + 1..].iter().all(|(other, _, _)| other != code),
                "duplicate code {}",
                code
            );
        }
    }
}
