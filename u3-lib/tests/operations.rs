//! Session operations: analog, DAC, digital and timer/counter IO

mod common;

use common::*;
use u3_lib::commands::TimerClockBase;
use u3_lib::ops::{AnalogInput, TimerCounterConfig, TimerCounterRead};

fn sent(u3: &mut U3<MockTransport>) -> Vec<Vec<u8>> {
    u3.transport_mut().sent().to_vec()
}

#[tokio::test]
async fn test_invalid_analog_channels_do_no_io() {
    let mut u3 = session(LEGACY, false, vec![]);

    let result = u3.analog_read(&AnalogInput::single_ended(16)).await;
    assert!(matches!(result, Err(U3Error::InvalidChannel(_))));

    let result = u3.analog_read(&AnalogInput::differential(0, 20)).await;
    assert!(matches!(result, Err(U3Error::InvalidChannel(_))));

    // special range needs hardware 1.30
    let result = u3.analog_read(&AnalogInput::differential(0, 32)).await;
    assert!(matches!(result, Err(U3Error::InvalidChannel(_))));

    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_analog_read_enables_analog_line() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![
            config_io_reply(0, 0, 0x00, 0x00),
            config_io_reply(0, 0, 0x01, 0x00),
            feedback_reply(0, 0, &40000u16.to_le_bytes()),
        ],
    );

    let reading = u3.analog_read(&AnalogInput::single_ended(0)).await.unwrap();
    assert_eq!(reading.raw, 40000);
    assert!(approx_eq(reading.value, 0.000037231 * 40000.0, 1e-9));

    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 3);
    // read-only ConfigIO, then the analog write
    assert_eq!(sent[0][6], 0);
    assert_eq!(sent[1][6], 12);
    assert_eq!(sent[1][10], 0x01);
    assert_eq!(sent[1][11], 0x00);
    // AIN descriptor
    assert_eq!(sent[2][3], 0x00);
    assert_eq!(&sent[2][7..10], &[1, 0, 31]);
}

#[tokio::test]
async fn test_analog_read_skips_write_when_already_analog() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![
            config_io_reply(0, 0, 0x03, 0x00),
            feedback_reply(0, 0, &32768u16.to_le_bytes()),
        ],
    );

    let reading = u3.analog_read(&AnalogInput::differential(0, 1)).await.unwrap();
    assert!(approx_eq(reading.value, 0.000074463 * 32768.0 - 2.44, 1e-9));
    assert_eq!(sent(&mut u3).len(), 2);
}

#[tokio::test]
async fn test_analog_read_eio_line() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![
            config_io_reply(0, 0, 0x0F, 0x00),
            config_io_reply(0, 0, 0x0F, 0x04),
            feedback_reply(0, 0, &1000u16.to_le_bytes()),
        ],
    );

    u3.analog_read(&AnalogInput::single_ended(10)).await.unwrap();
    let sent = sent(&mut u3);
    assert_eq!(sent[1][10], 0x0F);
    assert_eq!(sent[1][11], 0x04);
}

#[tokio::test]
async fn test_analog_read_without_configure_io() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(0, 0, &1000u16.to_le_bytes())]);
    let input = AnalogInput {
        configure_io: false,
        long_settling: true,
        quick_sample: true,
        ..AnalogInput::single_ended(5)
    };

    u3.analog_read(&input).await.unwrap();
    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][8], 5 | 0x40 | 0x80);
}

#[tokio::test]
async fn test_temperature_sensor_reads_kelvin() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![
            config_io_reply(0, 0, 0x0F, 0x00),
            feedback_reply(0, 0, &23000u16.to_le_bytes()),
        ],
    );

    let reading = u3.analog_read(&AnalogInput::single_ended(30)).await.unwrap();
    assert!(approx_eq(reading.value, 0.013021 * 23000.0, 1e-9));
}

#[tokio::test]
async fn test_high_voltage_input_skips_config_io() {
    let mut u3 = session(HW_130, true, vec![feedback_reply(0, 0, &40000u16.to_le_bytes())]);

    let reading = u3.analog_read(&AnalogInput::single_ended(0)).await.unwrap();
    assert!(approx_eq(reading.value, 12.56 - 10.3, 1e-9));
    assert_eq!(sent(&mut u3).len(), 1);
}

#[tokio::test]
async fn test_high_voltage_rejects_differential() {
    let mut u3 = session(HW_130, true, vec![]);
    let result = u3.analog_read(&AnalogInput::differential(0, 1)).await;
    assert!(matches!(result, Err(U3Error::InvalidChannel(_))));

    let result = u3.analog_read(&AnalogInput::differential(5, 2)).await;
    assert!(matches!(result, Err(U3Error::InvalidChannel(_))));
    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_special_range_sent_as_vref() {
    let mut u3 = session(HW_130, false, vec![feedback_reply(0, 0, &40000u16.to_le_bytes())]);
    let input = AnalogInput {
        configure_io: false,
        ..AnalogInput::differential(2, 32)
    };

    let reading = u3.analog_read(&input).await.unwrap();
    assert!(approx_eq(reading.value, 0.000074463 * 40000.0 - 2.44 + 2.44, 1e-9));
    assert_eq!(sent(&mut u3)[0][9], 30);
}

#[tokio::test]
async fn test_invalid_calibration_blocks_conversions() {
    let calibration = CalibrationInfo::new(9, LEGACY, false, TEST_CONSTANTS);
    let mut u3 = U3::with_calibration(MockTransport::new(), calibration, false);

    assert!(matches!(
        u3.analog_read(&AnalogInput::single_ended(0)).await,
        Err(U3Error::InvalidCalibration)
    ));
    assert!(matches!(
        u3.analog_write(0, 1.0, false).await,
        Err(U3Error::InvalidCalibration)
    ));
    assert!(u3.transport_mut().sent().is_empty());
}

#[tokio::test]
async fn test_legacy_dac1_write_enables_dac1() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![config_io_reply(0, 1, 0x0F, 0x00), feedback_reply(0, 0, &[])],
    );

    u3.analog_write(1, 1.5, true).await.unwrap();
    assert!(u3.dac1_enabled());

    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0][6], 2);
    assert_eq!(sent[0][9], 1);
    // 1.5 V * 51.717 truncated
    assert_eq!(&sent[1][7..9], &[35, 77]);
}

#[tokio::test]
async fn test_hw130_dac_is_16_bit() {
    let mut u3 = session(HW_130, false, vec![feedback_reply(0, 0, &[])]);

    u3.analog_write(0, 1.5, true).await.unwrap();
    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][7], 38);
    let code = u16::from_le_bytes([sent[0][8], sent[0][9]]);
    assert_eq!(code, (1.5 * 51.717 * 256.0) as u16);
}

#[tokio::test]
async fn test_dac_out_of_range_clamps() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(0, 0, &[])]);
    u3.analog_write(0, 10.0, false).await.unwrap();
    assert_eq!(&sent(&mut u3)[0][7..9], &[34, 255]);
}

#[tokio::test]
async fn test_invalid_dac_number() {
    let mut u3 = session(HW_130, false, vec![]);
    assert!(matches!(u3.analog_write(2, 1.0, true).await, Err(U3Error::InvalidDac(2))));
    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_digital_write_clears_analog_bit() {
    let mut u3 = session(
        LEGACY,
        false,
        vec![
            config_io_reply(0, 0, 0x0F, 0x00),
            config_io_reply(0, 0, 0x0B, 0x00),
            feedback_reply(0, 0, &[]),
        ],
    );

    u3.digital_write(2, true, true).await.unwrap();
    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1][6], 12);
    assert_eq!(sent[1][10], 0x0B);
    // direction output, then state high
    assert_eq!(&sent[2][7..11], &[13, 0x82, 11, 0x82]);
}

#[tokio::test]
async fn test_digital_write_cio_line_skips_config_io() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(0, 0, &[])]);
    u3.digital_write(17, false, true).await.unwrap();

    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][7..11], &[13, 0x91, 11, 0x11]);
}

#[tokio::test]
async fn test_digital_read() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(0, 0, &[1])]);
    assert!(u3.digital_read(3, false).await.unwrap());

    let sent = sent(&mut u3);
    assert_eq!(&sent[0][7..11], &[13, 0x03, 10, 0x03]);
}

#[tokio::test]
async fn test_digital_read_low() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(0, 0, &[0])]);
    assert!(!u3.digital_read(19, false).await.unwrap());
}

#[tokio::test]
async fn test_invalid_digital_channel() {
    let mut u3 = session(LEGACY, false, vec![]);
    assert!(matches!(
        u3.digital_read(20, true).await,
        Err(U3Error::InvalidChannel(_))
    ));
    assert!(matches!(
        u3.digital_write(20, true, true).await,
        Err(U3Error::InvalidChannel(_))
    ));
    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_timer_counter_configure() {
    let mut u3 = session(
        HW_130,
        false,
        vec![
            timer_clock_reply(0x02, 1),
            config_io_reply(0, 0, 0xFF, 0x00),
            config_io_reply(74, 0, 0x8F, 0x00),
            feedback_reply(0, 0, &[]),
        ],
    );
    let config = TimerCounterConfig {
        enable_timers: [true, true],
        enable_counters: [false, true],
        pin_offset: 4,
        clock_base: TimerClockBase::Clock48Mhz,
        clock_divisor: 1,
        timer_modes: [0, 1],
        timer_values: [0, 0],
    };

    u3.timer_counter_configure(&config).await.unwrap();
    let sent = sent(&mut u3);
    assert_eq!(sent.len(), 4);

    assert_eq!(sent[0][3], 0x0A);
    assert_eq!(sent[0][8], 0x82);
    // ConfigIO: timer/counter, FIO and EIO written; FIO4-6 made digital
    assert_eq!(sent[2][6], 13);
    assert_eq!(sent[2][8], 74);
    assert_eq!(sent[2][10], 0x8F);
    // TimerConfig descriptors
    assert_eq!(&sent[3][7..15], &[43, 0, 0, 0, 45, 1, 0, 0]);
}

#[tokio::test]
async fn test_timer_counter_configure_counters_only() {
    let mut u3 = session(
        HW_130,
        false,
        vec![
            timer_clock_reply(0x02, 1),
            config_io_reply(0, 0, 0x00, 0x00),
            config_io_reply(0x0C, 0, 0x00, 0x00),
        ],
    );
    let config = TimerCounterConfig {
        enable_timers: [false, true],
        enable_counters: [true, true],
        pin_offset: 0,
        clock_base: TimerClockBase::Clock48Mhz,
        clock_divisor: 1,
        timer_modes: [0, 0],
        timer_values: [0, 0],
    };

    u3.timer_counter_configure(&config).await.unwrap();
    let sent = sent(&mut u3);
    // Timer1 without Timer0 enables no timers, so no Feedback follows
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2][8], 0x0C);
}

#[tokio::test]
async fn test_timer_counter_pin_offset_range() {
    let mut u3 = session(HW_130, false, vec![]);
    let config = TimerCounterConfig {
        enable_timers: [true, false],
        enable_counters: [false, false],
        pin_offset: 9,
        clock_base: TimerClockBase::Clock48Mhz,
        clock_divisor: 1,
        timer_modes: [0, 0],
        timer_values: [0, 0],
    };
    assert!(matches!(
        u3.timer_counter_configure(&config).await,
        Err(U3Error::InvalidRange(_))
    ));
    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_timer_counter_read() {
    let mut results = Vec::new();
    results.extend_from_slice(&16u32.to_le_bytes());
    results.extend_from_slice(&42u32.to_le_bytes());
    let mut u3 = session(HW_130, false, vec![feedback_reply(0, 0, &results)]);

    let request = TimerCounterRead {
        read_timers: [true, false],
        read_counters: [false, true],
        reset_counters: [false, true],
        ..TimerCounterRead::default()
    };
    let values = u3.timer_counter_read(&request).await.unwrap();
    assert_eq!(values.timers, [16, 0]);
    assert_eq!(values.counters, [0, 42]);

    let sent = sent(&mut u3);
    assert_eq!(&sent[0][7..13], &[42, 0, 0, 0, 55, 1]);
}

#[tokio::test]
async fn test_timer_update_without_read() {
    let mut u3 = session(HW_130, false, vec![feedback_reply(0, 0, &[0xFF, 0xFF, 0, 0])]);
    let request = TimerCounterRead {
        update_reset_timers: [false, true],
        timer_values: [0, 1000],
        ..TimerCounterRead::default()
    };

    let values = u3.timer_counter_read(&request).await.unwrap();
    assert_eq!(values, Default::default());
    let sent = sent(&mut u3);
    assert_eq!(&sent[0][7..11], &[44, 1, 0xE8, 0x03]);
}

#[tokio::test]
async fn test_timer_counter_read_nothing_requested() {
    let mut u3 = session(HW_130, false, vec![]);
    let values = u3.timer_counter_read(&TimerCounterRead::default()).await.unwrap();
    assert_eq!(values.timers, [0, 0]);
    assert_eq!(values.counters, [0, 0]);
    assert!(sent(&mut u3).is_empty());
}

#[tokio::test]
async fn test_feedback_error_frame_surfaces() {
    let mut u3 = session(LEGACY, false, vec![feedback_reply(5, 2, &[0, 0])]);
    let result = u3
        .analog_read(&AnalogInput {
            configure_io: false,
            ..AnalogInput::single_ended(0)
        })
        .await;
    assert!(matches!(
        result,
        Err(U3Error::DeviceError {
            code: 5,
            frame: Some(2)
        })
    ));
}

#[tokio::test]
async fn test_corrupted_reply_fails_operations() {
    let mut bad_config = config_io_reply(0, 0, 0x0F, 0x00);
    bad_config[9] ^= 0x10;
    let mut u3 = session(LEGACY, false, vec![bad_config]);
    assert!(matches!(
        u3.analog_read(&AnalogInput::single_ended(0)).await,
        Err(U3Error::ChecksumMismatch { .. })
    ));

    let mut bad_feedback = feedback_reply(0, 0, &[1]);
    bad_feedback[9] ^= 0x01;
    let mut u3 = session(LEGACY, false, vec![bad_feedback]);
    assert!(matches!(
        u3.digital_read(3, false).await,
        Err(U3Error::ChecksumMismatch { .. })
    ));

    let mut bad_clock = timer_clock_reply(0x02, 1);
    bad_clock[0] ^= 0xFF;
    let mut u3 = session(HW_130, false, vec![bad_clock]);
    let config = TimerCounterConfig {
        enable_timers: [true, false],
        enable_counters: [false, false],
        pin_offset: 4,
        clock_base: TimerClockBase::Clock48Mhz,
        clock_divisor: 1,
        timer_modes: [0, 0],
        timer_values: [0, 0],
    };
    assert!(matches!(
        u3.timer_counter_configure(&config).await,
        Err(U3Error::ChecksumMismatch {
            field: ChecksumField::Checksum8,
            ..
        })
    ));
}

#[tokio::test]
async fn test_corrupted_reply_fails_writes_and_counters() {
    let mut bad_dac = feedback_reply(0, 0, &[]);
    bad_dac[8] ^= 0x01;
    let mut u3 = session(HW_130, false, vec![bad_dac]);
    assert!(matches!(
        u3.analog_write(0, 1.5, false).await,
        Err(U3Error::ChecksumMismatch { .. })
    ));

    // CIO line, no ConfigIO round trip
    let mut bad_write = feedback_reply(0, 0, &[]);
    bad_write[8] ^= 0x01;
    let mut u3 = session(HW_130, false, vec![bad_write]);
    assert!(matches!(
        u3.digital_write(17, true, true).await,
        Err(U3Error::ChecksumMismatch { .. })
    ));
    assert_eq!(sent(&mut u3).len(), 1);

    let mut bad_counters = feedback_reply(0, 0, &[0; 4]);
    bad_counters[10] ^= 0x01;
    let mut u3 = session(HW_130, false, vec![bad_counters]);
    let request = TimerCounterRead {
        read_counters: [true, false],
        ..TimerCounterRead::default()
    };
    assert!(matches!(
        u3.timer_counter_read(&request).await,
        Err(U3Error::ChecksumMismatch { .. })
    ));
}

#[tokio::test]
async fn test_read_tdac_calibration_pin_range() {
    let mut u3 = session(HW_130, false, vec![]);
    assert!(matches!(
        u3.read_tdac_calibration(19).await,
        Err(U3Error::InvalidChannel(_))
    ));
    assert!(sent(&mut u3).is_empty());
}
