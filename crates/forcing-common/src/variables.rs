//! NWM input variables and the ngen output names they map to.

/// One forcing variable: the NWM field it is read from and the ngen column it
/// is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcingVariable {
    pub nwm_name: &'static str,
    pub ngen_name: &'static str,
    pub units: &'static str,
}

/// Ordered variable table. `RAINRATE` is read twice: `APCP_surface` carries the
/// rate unchanged (mm s-1) rather than an accumulation. Downstream
/// realizations are configured against this, so it stays as is.
pub const FORCING_VARIABLES: [ForcingVariable; 9] = [
    ForcingVariable {
        nwm_name: "U2D",
        ngen_name: "UGRD_10maboveground",
        units: "m s-1",
    },
    ForcingVariable {
        nwm_name: "V2D",
        ngen_name: "VGRD_10maboveground",
        units: "m s-1",
    },
    ForcingVariable {
        nwm_name: "LWDOWN",
        ngen_name: "DLWRF_surface",
        units: "W m-2",
    },
    ForcingVariable {
        nwm_name: "RAINRATE",
        ngen_name: "APCP_surface",
        units: "mm s-1",
    },
    ForcingVariable {
        nwm_name: "RAINRATE",
        ngen_name: "precip_rate",
        units: "mm s-1",
    },
    ForcingVariable {
        nwm_name: "T2D",
        ngen_name: "TMP_2maboveground",
        units: "K",
    },
    ForcingVariable {
        nwm_name: "Q2D",
        ngen_name: "SPFH_2maboveground",
        units: "kg kg-1",
    },
    ForcingVariable {
        nwm_name: "PSFC",
        ngen_name: "PRES_surface",
        units: "Pa",
    },
    ForcingVariable {
        nwm_name: "SWDOWN",
        ngen_name: "DSWRF_surface",
        units: "W m-2",
    },
];

/// Output column names in table order.
pub fn ngen_names() -> Vec<&'static str> {
    FORCING_VARIABLES.iter().map(|v| v.ngen_name).collect()
}

/// Distinct NWM fields in first-use order.
pub fn distinct_nwm_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for var in FORCING_VARIABLES.iter() {
        if !names.contains(&var.nwm_name) {
            names.push(var.nwm_name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rainrate_feeds_two_outputs() {
        let rain: Vec<_> = FORCING_VARIABLES
            .iter()
            .filter(|v| v.nwm_name == "RAINRATE")
            .map(|v| v.ngen_name)
            .collect();
        assert_eq!(rain, vec!["APCP_surface", "precip_rate"]);
    }

    #[test]
    fn test_distinct_names() {
        let names = distinct_nwm_names();
        assert_eq!(names.len(), 8);
        assert_eq!(names[0], "U2D");
        assert_eq!(names[7], "SWDOWN");
    }
}
