//! Unit tests for the public block device surface

use rsu_flash::prelude::*;
use rsu_flash::{check_erase_alignment, check_range, fill_erased};

type TestResult = Result<(), Box<dyn std::error::Error>>;

mod boxed_device_tests {
    use super::*;

    #[test]
    fn test_boxed_device_forwards() -> TestResult {
        let mut dev: Box<dyn BlockDevice> = Box::new(MemoryDevice::new(0x2000, 0x1000));
        assert_eq!(dev.size(), 0x2000);
        assert_eq!(dev.erase_size(), 0x1000);
        dev.write(0x1000, &[0xA5; 4])?;
        assert_eq!(dev.read_vec(0x1000, 4)?, vec![0xA5; 4]);
        dev.erase(0x1000, 0x1000)?;
        assert_eq!(dev.read_vec(0x1000, 4)?, vec![0xFF; 4]);
        Ok(())
    }
}

mod helper_tests {
    use super::*;
    use rsu_flash::FILL_CHUNK;

    #[test]
    fn test_zero_length_access_at_end() -> TestResult {
        check_range(0x100, 0x100, 0)?;
        let mut dev = MemoryDevice::new(0x100, 0);
        assert!(dev.read_vec(0x100, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unaligned_erase_error_carries_unit() {
        let err = check_erase_alignment(0x10000, 0x8000, 0x10000);
        assert!(matches!(
            err,
            Err(FlashError::Misaligned {
                erase_size: 0x10000,
                ..
            })
        ));
    }

    #[test]
    fn test_fill_erased_stops_on_error() {
        let mut calls = 0;
        let result = fill_erased(0, 3 * FILL_CHUNK as u64, |offset, _| {
            calls += 1;
            if offset > 0 {
                Err(FlashError::InjectedFault { offset })
            } else {
                Ok(())
            }
        });
        assert!(matches!(
            result,
            Err(FlashError::InjectedFault { offset: 4096 })
        ));
        assert_eq!(calls, 2);
    }

}

mod concat_tests {
    use super::*;

    #[test]
    fn test_concat_reports_combined_geometry() -> TestResult {
        let dev = ConcatDevice::new(vec![
            Box::new(MemoryDevice::new(0x4000, 0x1000)),
            Box::new(MemoryDevice::new(0x2000, 0x1000)),
        ])?;
        assert_eq!(dev.size(), 0x6000);
        assert_eq!(dev.erase_size(), 0x1000);
        assert_eq!(dev.device_count(), 2);
        Ok(())
    }

    #[test]
    fn test_concat_erase_across_members() -> TestResult {
        let mut dev = ConcatDevice::new(vec![
            Box::new(MemoryDevice::from_bytes(vec![0; 0x2000], 0x1000)),
            Box::new(MemoryDevice::from_bytes(vec![0; 0x2000], 0x1000)),
        ])?;
        dev.erase(0x1000, 0x2000)?;
        let data = dev.read_vec(0, 0x4000)?;
        assert!(data.iter().take(0x1000).all(|&b| b == 0));
        assert!(data.iter().skip(0x1000).take(0x2000).all(|&b| b == 0xFF));
        assert!(data.iter().skip(0x3000).all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_concat_rejects_misaligned_erase_before_touching_members() -> TestResult {
        let mut dev = ConcatDevice::new(vec![
            Box::new(MemoryDevice::from_bytes(vec![0; 0x2000], 0x1000)),
            Box::new(MemoryDevice::from_bytes(vec![0; 0x2000], 0x1000)),
        ])?;
        assert!(matches!(
            dev.erase(0x1800, 0x1000),
            Err(FlashError::Misaligned { .. })
        ));
        assert!(dev.read_vec(0, 0x4000)?.iter().all(|&b| b == 0));
        Ok(())
    }
}
