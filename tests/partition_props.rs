use proptest::prelude::*;
use strata::partition::{partition, RemainderPolicy};

fn policy() -> impl Strategy<Value = RemainderPolicy> {
    prop_oneof![Just(RemainderPolicy::LastBand), Just(RemainderPolicy::Spread)]
}

proptest! {
    #[test]
    fn bands_tile_the_image(
        width in 1usize..512,
        height in 1usize..512,
        devices in 1usize..24,
        bpp in 1usize..5,
        policy in policy(),
    ) {
        let bands = partition(width, height, devices, bpp, policy).unwrap();
        prop_assert_eq!(bands.len(), devices);

        let mut next_row = 0;
        let mut next_byte = 0;
        for (i, band) in bands.iter().enumerate() {
            prop_assert_eq!(band.index, i);
            prop_assert_eq!(band.offset, [0, next_row]);
            prop_assert_eq!(band.extent[0], width);
            prop_assert_eq!(band.byte_offset, next_byte);
            prop_assert_eq!(band.byte_len, band.rows() * width * bpp);
            next_row = band.end_row();
            next_byte = band.byte_range().end;
        }
        prop_assert_eq!(next_row, height);
        prop_assert_eq!(next_byte, width * height * bpp);
    }

    #[test]
    fn spread_bands_differ_by_at_most_one_row(
        height in 1usize..2048,
        devices in 1usize..64,
    ) {
        let bands = partition(7, height, devices, 3, RemainderPolicy::Spread).unwrap();
        let min = bands.iter().map(|b| b.rows()).min().unwrap();
        let max = bands.iter().map(|b| b.rows()).max().unwrap();
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn last_band_takes_the_remainder(
        height in 1usize..2048,
        devices in 1usize..64,
    ) {
        let bands = partition(5, height, devices, 3, RemainderPolicy::LastBand).unwrap();
        let (last, rest) = bands.split_last().unwrap();
        prop_assert!(rest.iter().all(|b| b.rows() == height / devices));
        prop_assert_eq!(last.rows(), height / devices + height % devices);
    }

    #[test]
    fn policies_agree_when_rows_divide_evenly(
        per_device in 1usize..64,
        devices in 1usize..32,
    ) {
        let height = per_device * devices;
        let last = partition(9, height, devices, 3, RemainderPolicy::LastBand).unwrap();
        let spread = partition(9, height, devices, 3, RemainderPolicy::Spread).unwrap();
        let reject = partition(9, height, devices, 3, RemainderPolicy::Reject).unwrap();
        prop_assert_eq!(&last, &spread);
        prop_assert_eq!(&last, &reject);
    }

    #[test]
    fn reject_refuses_any_remainder(
        height in 1usize..1024,
        devices in 2usize..32,
    ) {
        prop_assume!(height % devices != 0);
        prop_assert!(partition(4, height, devices, 3, RemainderPolicy::Reject).is_err());
    }
}
