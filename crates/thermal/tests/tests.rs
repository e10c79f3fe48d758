use float_cmp::approx_eq;
use thermal::Pid;

#[test]
fn first_update_has_nonzero_derivative() {
    // Worked example: kp=15, ki=1, kd=3, setpoint=65, measured=60, dt=1,
    // integral and last_error both start at zero.
    let mut pid = Pid::new(15.0_f64, 1.0, 3.0, 65.0, -100.0, 100.0);
    pid.set_error_accumulation_cap(1.5);

    let output = pid.update(60.0, 1.0);

    // error = 5, integral = 5 capped to 1.5, deriv = (5 - 0) / 1 = 5
    // raw = 15*5 + 1*1.5 + 3*5 = 75 + 1.5 + 15 = 91.5
    assert!(approx_eq!(f64, output, 91.5, epsilon = 1e-9), "output was {output}");
}

#[test]
fn integral_never_exceeds_cap() {
    let mut pid = Pid::new(0.0_f64, 1.0, 0.0, 100.0, -1000.0, 1000.0);
    pid.set_error_accumulation_cap(2.0);

    let mut last = 0.0;
    for _ in 0..50 {
        last = pid.update(0.0, 1.0);
    }
    // ki=1, so output == integral once it saturates.
    assert!(approx_eq!(f64, last, 2.0, epsilon = 1e-9), "output was {last}");
}

#[test]
fn output_is_clamped_to_bounds() {
    let mut pid = Pid::new(100.0_f64, 0.0, 0.0, 1000.0, -10.0, 10.0);
    let output = pid.update(0.0, 1.0);
    assert!(approx_eq!(f64, output, 10.0, epsilon = 1e-9));
}

#[test]
fn zero_error_converges_to_zero_output() {
    let mut pid = Pid::new(5.0_f64, 0.1, 1.0, 50.0, -100.0, 100.0);
    let output = pid.update(50.0, 1.0);
    assert!(approx_eq!(f64, output, 0.0, epsilon = 1e-9));
}

#[test]
fn nonpositive_dt_suppresses_derivative_only() {
    let mut pid = Pid::new(1.0_f64, 0.0, 10.0, 10.0, -1000.0, 1000.0);
    // First call seeds last_error via a dt<=0 step (derivative forced to 0).
    let output = pid.update(0.0, 0.0);
    // p_term = 1*10 = 10, i_term = 0 (ki=0), d_term = 0 (dt<=0)
    assert!(approx_eq!(f64, output, 10.0, epsilon = 1e-9));
}

#[test]
fn converges_on_a_simple_heater_model() {
    let mut temp = 25.0_f64;
    let ambient = 25.0;
    let setpoint = 100.0;
    let mut pid = Pid::new(5.0, 0.1, 1.0, setpoint, 0.0, 1.0);
    pid.set_error_accumulation_cap(50.0);
    let dt = 1.0;

    for _ in 0..100 {
        let output = pid.update(temp, dt);
        temp += output * 2.0 - (temp - ambient) * 0.05;
    }

    assert!(approx_eq!(f64, temp, setpoint, epsilon = 2.0), "final temp {temp} was not close to setpoint {setpoint}");
}
